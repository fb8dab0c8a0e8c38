use std::path::PathBuf;

use clap::Parser;

/// Minimal CLI wrapper around `RelayConfig::load` — the binary is just
/// "load config, construct Adapter, run".
#[derive(Debug, Parser)]
#[command(name = "relay-adapter", about = "Bridges one chat platform to the framework event socket")]
pub struct Cli {
    /// Path to relay.toml. Falls back to `RELAY_CONFIG`, then
    /// `~/.relay/relay.toml`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}
