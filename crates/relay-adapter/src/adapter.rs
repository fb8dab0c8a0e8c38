use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use relay_attachments::Downloader;
use relay_cache::{AttachmentCache, MessageCache, UserCache};
use relay_conversations::{ConversationManager, DefaultThreadHandler, MessageBuilder};
use relay_core::{AdapterError, RelayConfig, Result as CoreResult};
use relay_discord::register as register_discord;
use relay_emoji::EmojiConverter;
use relay_eventbus::EventBus;
use relay_pipeline::{BotRequestEvent, HistoryFetcher, IncomingEventProcessor, OutgoingEventProcessor};
use relay_platform::{PlatformClient, PlatformRegistry, RawMessage};
use relay_ratelimit::RateLimiter;

/// Default mention normalization — the one concrete `MessageBuilder` we
/// ship. Platforms needing richer mention rewriting (markdown-aware,
/// role-mention expansion, ...) would supply their own.
struct PassthroughMessageBuilder;
impl MessageBuilder for PassthroughMessageBuilder {
    fn normalize_mentions(&self, _raw: &RawMessage) -> Vec<relay_cache::Mention> {
        Vec::new()
    }
}

/// Owns the lifecycle of every component per §4.8: constructs them in
/// dependency order, runs the connection monitor as a background task, and
/// tears everything down in reverse on `stop()`.
pub struct Adapter {
    config: RelayConfig,
    client: Arc<dyn PlatformClient>,
    event_bus: Arc<EventBus>,
    bot_request_tx: mpsc::Sender<BotRequestEvent>,
    maintenance_handles: Vec<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
    forward_handle: Option<JoinHandle<()>>,
    incoming_handle: Option<JoinHandle<()>>,
}

impl Adapter {
    pub fn build(config: RelayConfig) -> CoreResult<Self> {
        // 1. Config is already loaded by the caller.
        // 2. RateLimiter.
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.global_rpm,
            config.rate_limit.per_conversation_rpm,
            config.rate_limit.message_rpm,
        ));
        let mut maintenance_handles = Vec::new();
        maintenance_handles.push(rate_limiter.start_maintenance(Duration::from_secs(config.rate_limit.bucket_sweep_interval_secs)));

        // 3. Caches, with maintenance sweeps and attachment rehydration.
        let message_cache = Arc::new(MessageCache::new(
            config.cache.max_total_messages,
            config.cache.max_messages_per_conversation,
            config.cache.max_age_hours,
        ));
        maintenance_handles.push(message_cache.start_maintenance(Duration::from_secs(config.cache.cache_maintenance_interval_secs)));

        let user_cache = Arc::new(UserCache::new(config.cache.max_total_users, config.cache.max_age_hours));
        maintenance_handles.push(user_cache.start_maintenance(Duration::from_secs(config.cache.cache_maintenance_interval_secs)));

        let attachment_cache = Arc::new(AttachmentCache::new(
            config.adapter.storage_dir.clone(),
            config.cache.max_total_attachments,
            config.cache.max_age_hours,
        ));
        attachment_cache.rehydrate();
        maintenance_handles.push(attachment_cache.start_maintenance(Duration::from_secs(config.cache.cache_maintenance_interval_secs)));

        // 4. PlatformClient, resolved from the registry by adapter_type.
        let mut registry = PlatformRegistry::new();
        if let Some(discord) = config.discord.clone() {
            register_discord(&mut registry, discord);
        }
        let client = registry
            .build(&config.adapter.adapter_type)
            .ok_or_else(|| AdapterError::Config(format!("no platform registered for adapter_type '{}'", config.adapter.adapter_type)))?;

        // 5. Processors.
        let manager = Arc::new(ConversationManager::new(
            Arc::clone(&message_cache),
            Arc::clone(&user_cache),
            Arc::clone(&attachment_cache),
            Box::new(DefaultThreadHandler),
            Box::new(PassthroughMessageBuilder),
        ));
        let downloader = Arc::new(Downloader::new(Arc::clone(&attachment_cache), config.attachments.max_file_size_mb));
        let emoji = Arc::new(EmojiConverter::new());
        let history = Arc::new(HistoryFetcher::new(
            Arc::clone(&rate_limiter),
            config.cache.max_pagination_iterations,
            config.cache.cache_fetched_history,
        ));

        let incoming = Arc::new(IncomingEventProcessor::new(
            Arc::clone(&manager),
            Arc::clone(&downloader),
            Arc::clone(&history),
            Arc::clone(&client),
            Arc::clone(&emoji),
            config.eventbus.filter_own_reactions,
            config.cache.history_bootstrap_limit,
        ));
        let outgoing = Arc::new(OutgoingEventProcessor::new(
            Arc::clone(&manager),
            Arc::clone(&client),
            Arc::clone(&rate_limiter),
            Arc::clone(&downloader),
            Arc::clone(&history),
            Arc::clone(&emoji),
            config.eventbus.max_message_length,
        ));

        // 6. EventBus.
        let adapter_type: &'static str = Box::leak(config.adapter.adapter_type.clone().into_boxed_str());
        let event_bus = Arc::new(EventBus::new(adapter_type, outgoing, Arc::clone(&manager), downloader));

        let (bot_request_tx, bot_request_rx) = mpsc::channel(256);

        let bus_for_forward = Arc::clone(&event_bus);
        let forward_handle = tokio::spawn(async move { bus_for_forward.forward_incoming(bot_request_rx).await });

        let incoming_handle = client.take_event_stream().map(|raw_events| {
            let incoming = Arc::clone(&incoming);
            let tx = bot_request_tx.clone();
            tokio::spawn(async move { incoming.run(raw_events, tx).await })
        });

        Ok(Self {
            config,
            client,
            event_bus,
            bot_request_tx,
            maintenance_handles,
            monitor_handle: None,
            forward_handle: Some(forward_handle),
            incoming_handle,
        })
    }

    /// Connects the platform client, serves `/events` (and `/health`), and
    /// starts `_monitor_connection` as a background task. Returns once the
    /// HTTP server itself exits (normally only on `stop()` or a fatal
    /// connection loss).
    pub async fn start(mut self) -> CoreResult<()> {
        self.client.connect().await.map_err(|e| AdapterError::Fatal(e.to_string()))?;
        let _ = self.bot_request_tx.send(BotRequestEvent::Connect).await;

        self.monitor_handle = Some(self.spawn_monitor_connection());

        let router = self.router();
        let addr = format!("{}:{}", self.config.adapter.bind, self.config.adapter.port);
        info!(addr = %addr, adapter_type = %self.config.adapter.adapter_type, "relay-adapter listening");

        let listener = tokio::net::TcpListener::bind(addr.as_str()).await.map_err(|e| AdapterError::Fatal(e.to_string()))?;
        axum::serve(listener, router).await.map_err(|e| AdapterError::Fatal(e.to_string()))?;

        self.stop().await;
        Ok(())
    }

    fn router(&self) -> Router {
        let health_state = HealthState { client: Arc::clone(&self.client), adapter_type: self.config.adapter.adapter_type.clone() };
        Router::new()
            .route("/health", get(health_handler))
            .with_state(health_state)
            .merge(Arc::clone(&self.event_bus).router())
    }

    /// Background task: polls `PlatformClient::is_alive` every
    /// `connection_check_interval_secs`. A dead connection gets
    /// `max_reconnect_attempts` reconnect attempts before the adapter emits
    /// `disconnect` and exits the process — the `Fatal` disposition in the
    /// error taxonomy.
    fn spawn_monitor_connection(&self) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let tx = self.bot_request_tx.clone();
        let interval = Duration::from_secs(self.config.eventbus.connection_check_interval_secs);
        let max_attempts = self.config.eventbus.max_reconnect_attempts;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if client.is_alive() {
                    continue;
                }

                warn!("platform connection lost, attempting to reconnect");
                let mut reconnected = false;
                for attempt in 1..=max_attempts {
                    match client.connect().await {
                        Ok(()) => {
                            info!(attempt, "reconnected to platform");
                            reconnected = true;
                            break;
                        }
                        Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
                    }
                }

                if !reconnected {
                    error!(max_attempts, "exhausted reconnect attempts, shutting down");
                    let _ = tx.send(BotRequestEvent::Disconnect).await;
                    std::process::exit(1);
                }
            }
        })
    }

    /// Reverse-order teardown: maintenance tasks cancelled, `EventBus`
    /// drained, `PlatformClient` disconnected. Attachment-cache disk
    /// contents are never touched here — `AttachmentCache` only writes on
    /// `store`, so "preserved across restart" falls out of simply not
    /// calling anything that deletes.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
        for handle in self.maintenance_handles.drain(..) {
            handle.abort();
        }

        self.event_bus.shutdown().await;

        let _ = self.bot_request_tx.send(BotRequestEvent::Disconnect).await;
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "error disconnecting platform client during shutdown");
        }

        if let Some(handle) = self.forward_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.incoming_handle.take() {
            handle.abort();
        }
    }
}

#[derive(Clone)]
struct HealthState {
    client: Arc<dyn PlatformClient>,
    adapter_type: String,
}

async fn health_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "adapter_type": state.adapter_type,
        "connected": state.client.is_alive(),
    }))
}
