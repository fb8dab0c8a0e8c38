pub mod broadcast;
pub mod connection;
pub mod decode;
pub mod encode;
pub mod error;
pub mod frames;
pub mod queue;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::mpsc;

use relay_attachments::Downloader;
use relay_conversations::ConversationManager;
use relay_pipeline::{BotRequestEvent, OutgoingEventProcessor};

pub use broadcast::EventBroadcaster;
pub use error::{EventBusError, Result};
pub use queue::RequestQueue;

/// The framework-facing socket described in §4.7/§6.1: a single `/events`
/// WebSocket endpoint framing a FIFO, cancellable request queue over
/// `OutgoingEventProcessor`, and fanning normalized `BotRequestEvent`s back
/// out as `bot_request` frames.
pub struct EventBus {
    adapter_type: &'static str,
    broadcaster: EventBroadcaster,
    queue: RequestQueue,
    encoder: encode::FrameEncoder,
}

impl EventBus {
    pub fn new(
        adapter_type: &'static str,
        outgoing: Arc<OutgoingEventProcessor>,
        manager: Arc<ConversationManager>,
        downloader: Arc<Downloader>,
    ) -> Self {
        let broadcaster = EventBroadcaster::new();
        let queue = RequestQueue::spawn(outgoing, adapter_type, broadcaster.clone());
        let encoder = encode::FrameEncoder::new(manager, downloader);
        Self { adapter_type, broadcaster, queue, encoder }
    }

    /// Drains `events` (from `IncomingEventProcessor::run`), encoding each
    /// as a `bot_request` frame and broadcasting it to connected clients.
    /// Runs for the adapter's lifetime.
    pub async fn forward_incoming(&self, mut events: mpsc::Receiver<BotRequestEvent>) {
        while let Some(event) = events.recv().await {
            let (event_type, data) = self.encoder.encode_bot_request(&event).await;
            self.broadcaster.send(encode::encode_bot_request_frame(self.adapter_type, event_type, data));
        }
    }

    /// Builds the Axum router exposing `GET /events`. Callers merge this
    /// into their top-level router (or serve it standalone).
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/events", get(connection::ws_handler)).with_state(self)
    }

    /// On adapter shutdown: stop dispatching queued requests, and let
    /// `request_failed` drain the rest as the worker reaches them.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_cache::{AttachmentCache, ConversationType, Mention, MessageCache, UserCache};
    use relay_conversations::DefaultThreadHandler;
    use relay_core::{ConversationId, Origin};
    use relay_emoji::EmojiConverter;
    use relay_platform::test_support::FakeClient;
    use relay_platform::RawMessage;
    use relay_ratelimit::RateLimiter;

    struct PassthroughBuilder;
    impl relay_conversations::MessageBuilder for PassthroughBuilder {
        fn normalize_mentions(&self, _raw: &RawMessage) -> Vec<Mention> {
            Vec::new()
        }
    }

    fn bus() -> (Arc<ConversationManager>, Arc<EventBus>) {
        let messages = Arc::new(MessageCache::new(1000, 1000, 72));
        let users = Arc::new(UserCache::new(256, 72));
        let attachments = Arc::new(AttachmentCache::new(std::env::temp_dir(), 100, 72));
        let manager = Arc::new(ConversationManager::new(messages, users, attachments, Box::new(DefaultThreadHandler), Box::new(PassthroughBuilder)));
        let downloader = Arc::new(Downloader::new(manager.attachments().clone(), 8));
        let rate_limiter = Arc::new(RateLimiter::new(1000, 1000, 1000));
        let history = Arc::new(relay_pipeline::HistoryFetcher::new(Arc::clone(&rate_limiter), 10, true));
        let client: Arc<dyn relay_platform::PlatformClient> = Arc::new(FakeClient::new());
        let outgoing = Arc::new(OutgoingEventProcessor::new(
            Arc::clone(&manager),
            client,
            rate_limiter,
            Arc::clone(&downloader),
            history,
            Arc::new(EmojiConverter::new()),
            2000,
        ));
        let bus = Arc::new(EventBus::new("fake", outgoing, Arc::clone(&manager), downloader));
        (manager, bus)
    }

    #[tokio::test]
    async fn send_message_round_trips_through_the_queue() {
        let (manager, event_bus) = bus();
        let raw = RawMessage {
            platform_message_id: "seed".to_string(),
            platform_conversation_id: "g/c".to_string(),
            platform_thread_id: None,
            sender_id: "u1".to_string(),
            sender_display_name: "U1".to_string(),
            sender_is_bot: false,
            text: "hi".to_string(),
            raw_mentions: vec![],
            attachments: vec![],
            is_direct_message: false,
            is_pinned: false,
            timestamp_ms: 1,
        };
        let delta = manager.add_to_conversation(raw, ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = delta.conversation_id.unwrap();

        let mut rx = event_bus.broadcaster.subscribe();
        let event = relay_pipeline::OutgoingEvent {
            event_type: relay_pipeline::OutgoingEventType::SendMessage,
            conversation_id: conv_id,
            text: Some("hello".to_string()),
            message_id: None,
            mentions: vec![],
            attachments: vec![],
            emoji: None,
            history_limit: None,
            history_before_ms: None,
            history_after_ms: None,
            attachment_id: None,
        };

        let request_id = event_bus.queue.enqueue(event, &event_bus.broadcaster, "fake").await;

        let queued = rx.recv().await.unwrap();
        assert!(queued.contains("request_queued"));
        assert!(queued.contains(request_id.as_str()));

        let success = rx.recv().await.unwrap();
        assert!(success.contains("request_success"));
        assert!(success.contains("message_ids"));
    }

    #[tokio::test]
    async fn cancel_before_dispatch_never_reaches_the_processor() {
        let (manager, event_bus) = bus();
        let raw = RawMessage {
            platform_message_id: "seed".to_string(),
            platform_conversation_id: "g/c".to_string(),
            platform_thread_id: None,
            sender_id: "u1".to_string(),
            sender_display_name: "U1".to_string(),
            sender_is_bot: false,
            text: "hi".to_string(),
            raw_mentions: vec![],
            attachments: vec![],
            is_direct_message: false,
            is_pinned: false,
            timestamp_ms: 1,
        };
        let delta = manager.add_to_conversation(raw, ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = delta.conversation_id.unwrap();

        let mut rx = event_bus.broadcaster.subscribe();
        let event = relay_pipeline::OutgoingEvent {
            event_type: relay_pipeline::OutgoingEventType::SendMessage,
            conversation_id: conv_id,
            text: Some("hello".to_string()),
            message_id: None,
            mentions: vec![],
            attachments: vec![],
            emoji: None,
            history_limit: None,
            history_before_ms: None,
            history_after_ms: None,
            attachment_id: None,
        };

        let request_id = event_bus.queue.enqueue(event, &event_bus.broadcaster, "fake").await;
        event_bus.queue.cancel(&request_id, &event_bus.broadcaster, "fake");

        let queued = rx.recv().await.unwrap();
        assert!(queued.contains("request_queued"));
        let cancelled = rx.recv().await.unwrap();
        assert!(cancelled.contains("request_success"));
        assert!(cancelled.contains(request_id.as_str()));
    }
}
