pub mod client;
pub mod convert;
pub mod handler;

pub use client::DiscordClient;

use std::sync::Arc;

use relay_core::config::DiscordConfig;
use relay_platform::{PlatformClient, PlatformRegistry};

/// Register the Discord adapter under `adapter_type = "discord"`. Takes the
/// resolved `[discord]` config section directly — the caller (the adapter
/// binary) is responsible for surfacing a missing section as a config error
/// before this ever runs, since `PlatformFactory` itself is infallible.
pub fn register(registry: &mut PlatformRegistry, config: DiscordConfig) {
    registry.register("discord", Box::new(move || Arc::new(DiscordClient::new(config.clone())) as Arc<dyn PlatformClient>));
}
