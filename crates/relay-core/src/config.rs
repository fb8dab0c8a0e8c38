use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub eventbus: EventBusConfig,
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig {
                adapter_type: "discord".to_string(),
                storage_dir: default_storage_dir(),
                bind: default_bind(),
                port: default_port(),
            },
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            attachments: AttachmentsConfig::default(),
            eventbus: EventBusConfig::default(),
            discord: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Selects the `PlatformClient` implementation from the registry.
    #[serde(default = "default_adapter_type")]
    pub adapter_type: String,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    /// Bind address for the `EventBus`'s `/events` socket.
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_rpm")]
    pub global_rpm: u32,
    #[serde(default = "default_per_conversation_rpm")]
    pub per_conversation_rpm: u32,
    #[serde(default = "default_message_rpm")]
    pub message_rpm: u32,
    /// How often idle per-conversation buckets are swept from memory.
    #[serde(default = "default_bucket_sweep_interval_secs")]
    pub bucket_sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rpm: default_global_rpm(),
            per_conversation_rpm: default_per_conversation_rpm(),
            message_rpm: default_message_rpm(),
            bucket_sweep_interval_secs: default_bucket_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_total_messages")]
    pub max_total_messages: usize,
    #[serde(default = "default_max_messages_per_conversation")]
    pub max_messages_per_conversation: usize,
    #[serde(default = "default_max_total_attachments")]
    pub max_total_attachments: usize,
    #[serde(default = "default_cache_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_cache_maintenance_interval_secs")]
    pub cache_maintenance_interval_secs: u64,
    #[serde(default = "bool_true")]
    pub cache_fetched_history: bool,
    #[serde(default = "default_max_pagination_iterations")]
    pub max_pagination_iterations: u32,
    /// Page size for the history-first bootstrap fetch on a brand-new
    /// conversation.
    #[serde(default = "default_history_bootstrap_limit")]
    pub history_bootstrap_limit: usize,
    #[serde(default = "default_max_total_users")]
    pub max_total_users: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_messages: default_max_total_messages(),
            max_messages_per_conversation: default_max_messages_per_conversation(),
            max_total_attachments: default_max_total_attachments(),
            max_age_hours: default_cache_max_age_hours(),
            cache_maintenance_interval_secs: default_cache_maintenance_interval_secs(),
            cache_fetched_history: true,
            max_pagination_iterations: default_max_pagination_iterations(),
            history_bootstrap_limit: default_history_bootstrap_limit(),
            max_total_users: default_max_total_users(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_connection_check_interval_secs")]
    pub connection_check_interval_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "bool_true")]
    pub filter_own_reactions: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            connection_check_interval_secs: default_connection_check_interval_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            max_message_length: default_max_message_length(),
            filter_own_reactions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
}

fn bool_true() -> bool {
    true
}
fn default_adapter_type() -> String {
    "discord".to_string()
}
fn default_storage_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.relay/attachments")
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_global_rpm() -> u32 {
    120
}
fn default_per_conversation_rpm() -> u32 {
    20
}
fn default_message_rpm() -> u32 {
    20
}
fn default_bucket_sweep_interval_secs() -> u64 {
    600
}
fn default_max_total_messages() -> usize {
    10_000
}
fn default_max_messages_per_conversation() -> usize {
    500
}
fn default_max_total_attachments() -> usize {
    2_000
}
fn default_cache_max_age_hours() -> u64 {
    72
}
fn default_cache_maintenance_interval_secs() -> u64 {
    300
}
fn default_max_pagination_iterations() -> u32 {
    10
}
fn default_history_bootstrap_limit() -> usize {
    20
}
fn default_max_total_users() -> usize {
    5_000
}
fn default_max_file_size_mb() -> u64 {
    8
}
fn default_connection_check_interval_secs() -> u64 {
    30
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_max_message_length() -> usize {
    2000
}

impl RelayConfig {
    /// Load config from a TOML file with `RELAY_*` env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("_"))
            .extract()
            .map_err(|e| crate::error::AdapterError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.relay/relay.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.adapter.adapter_type, "discord");
        assert!(cfg.rate_limit.global_rpm > 0);
        assert!(cfg.cache.max_messages_per_conversation <= cfg.cache.max_total_messages);
    }
}
