use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::client::PlatformClient;

/// Constructs a `PlatformClient` from a raw bot-token-equivalent config
/// blob. Each platform crate registers one factory under its own
/// `adapter_type` name.
pub type PlatformFactory = Box<dyn Fn() -> Arc<dyn PlatformClient> + Send + Sync>;

/// A sealed set of platform implementations, keyed by `adapter_type` —
/// replaces runtime class-selection dispatch with a lookup the adapter
/// resolves once at startup from `config.adapter.adapter_type`.
#[derive(Default)]
pub struct PlatformRegistry {
    factories: HashMap<&'static str, PlatformFactory>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter_type: &'static str, factory: PlatformFactory) {
        info!(adapter_type, "platform registry: registered adapter");
        self.factories.insert(adapter_type, factory);
    }

    pub fn build(&self, adapter_type: &str) -> Option<Arc<dyn PlatformClient>> {
        self.factories.get(adapter_type).map(|f| f())
    }

    pub fn known_types(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
