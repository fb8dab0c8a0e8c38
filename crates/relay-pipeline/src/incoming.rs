use std::sync::Arc;

use chrono::Utc;
use relay_attachments::Downloader;
use relay_cache::ConversationType;
use relay_conversations::{ConversationDelta, ConversationManager};
use relay_core::{AttachmentId, ConversationId, MessageId, Origin, UserId};
use relay_emoji::EmojiConverter;
use relay_platform::{PlatformClient, RawAttachmentRef, RawEvent, RawMessage};
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::BotRequestEvent;
use crate::history::HistoryFetcher;

/// Dispatches raw platform events onto the `ConversationManager`, then
/// translates the resulting `ConversationDelta` into one or more
/// normalized `BotRequestEvent`s for the `EventBus` to frame outward.
///
/// One instance drives one platform connection's event stream.
pub struct IncomingEventProcessor {
    manager: Arc<ConversationManager>,
    downloader: Arc<Downloader>,
    history: Arc<HistoryFetcher>,
    client: Arc<dyn PlatformClient>,
    emoji: Arc<EmojiConverter>,
    filter_own_reactions: bool,
    history_bootstrap_limit: usize,
}

impl IncomingEventProcessor {
    pub fn new(
        manager: Arc<ConversationManager>,
        downloader: Arc<Downloader>,
        history: Arc<HistoryFetcher>,
        client: Arc<dyn PlatformClient>,
        emoji: Arc<EmojiConverter>,
        filter_own_reactions: bool,
        history_bootstrap_limit: usize,
    ) -> Self {
        Self {
            manager,
            downloader,
            history,
            client,
            emoji,
            filter_own_reactions,
            history_bootstrap_limit,
        }
    }

    /// Drains `events` until the platform client closes its stream,
    /// forwarding normalized events onto `bus`. Runs for the lifetime of
    /// one connection.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<RawEvent>, bus: mpsc::Sender<BotRequestEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event, &bus).await;
        }
    }

    async fn handle(&self, event: RawEvent, bus: &mpsc::Sender<BotRequestEvent>) {
        match event {
            RawEvent::MessageReceived(raw) => self.handle_message_received(raw, bus).await,
            RawEvent::MessageUpdated(raw) => self.handle_message_updated(raw, bus).await,
            RawEvent::MessageDeleted { platform_message_id, .. } => self.handle_message_deleted(platform_message_id, bus).await,
            RawEvent::ReactionAdded { platform_message_id, user_id, emoji, .. } => {
                self.handle_reaction_added(platform_message_id, user_id, emoji, bus).await
            }
            RawEvent::ReactionRemoved { platform_message_id, user_id, emoji, .. } => {
                self.handle_reaction_removed(platform_message_id, user_id, emoji, bus).await
            }
        }
    }

    async fn handle_message_received(&self, mut raw: RawMessage, bus: &mpsc::Sender<BotRequestEvent>) {
        let message_id = MessageId::from(raw.platform_message_id.clone());

        // Loopback: the platform echoed back a message we sent ourselves.
        // The outgoing processor already recorded it with origin=framework
        // when it was sent; a redelivery here must not re-surface it.
        if let Some(existing) = self.manager.messages().get(&message_id) {
            if existing.origin.is_framework() {
                return;
            }
        }

        self.normalize_mention_syntax(&mut raw);
        let resolved_attachments = self.resolve_attachments(&raw.attachments).await;
        let conversation_type = if raw.is_direct_message { ConversationType::Dm } else { ConversationType::Channel };

        let delta = self.manager.add_to_conversation(raw, conversation_type, resolved_attachments, Origin::Platform).await;
        self.emit_delta(delta, bus).await;
    }

    async fn handle_message_updated(&self, mut raw: RawMessage, bus: &mpsc::Sender<BotRequestEvent>) {
        let message_id = MessageId::from(raw.platform_message_id.clone());
        let Some(existing) = self.manager.messages().get(&message_id) else {
            // An edit for a message we never saw (e.g. observed before this
            // process started) — nothing to diff against, so drop it.
            return;
        };
        if existing.origin.is_framework() {
            return;
        }

        self.normalize_mention_syntax(&mut raw);
        let resolved_attachments = self.resolve_attachments(&raw.attachments).await;

        let delta = self.manager.update_conversation(&existing.conversation_id, &raw, resolved_attachments).await;
        self.emit_delta(delta, bus).await;
    }

    async fn handle_message_deleted(&self, platform_message_id: String, bus: &mpsc::Sender<BotRequestEvent>) {
        let message_id = MessageId::from(platform_message_id);
        let Some(existing) = self.manager.messages().get(&message_id) else {
            return;
        };
        if existing.origin.is_framework() {
            return;
        }

        let delta = self.manager.delete_from_conversation(&existing.conversation_id, &message_id).await;
        self.emit_delta(delta, bus).await;
    }

    async fn handle_reaction_added(&self, platform_message_id: String, user_id: String, emoji: String, bus: &mpsc::Sender<BotRequestEvent>) {
        if self.is_own_reaction(&user_id) {
            return;
        }
        let message_id = MessageId::from(platform_message_id);
        let Some(existing) = self.manager.messages().get(&message_id) else {
            return;
        };
        if existing.origin.is_framework() {
            return;
        }

        let unicode = self.emoji.to_unicode(&emoji);
        let delta = self.manager.add_reaction(&existing.conversation_id, &message_id, UserId::from(user_id), unicode).await;
        self.emit_delta(delta, bus).await;
    }

    async fn handle_reaction_removed(&self, platform_message_id: String, user_id: String, emoji: String, bus: &mpsc::Sender<BotRequestEvent>) {
        if self.is_own_reaction(&user_id) {
            return;
        }
        let message_id = MessageId::from(platform_message_id);
        let Some(existing) = self.manager.messages().get(&message_id) else {
            return;
        };
        if existing.origin.is_framework() {
            return;
        }

        let unicode = self.emoji.to_unicode(&emoji);
        let delta = self.manager.remove_reaction(&existing.conversation_id, &message_id, UserId::from(user_id), unicode).await;
        self.emit_delta(delta, bus).await;
    }

    fn is_own_reaction(&self, user_id: &str) -> bool {
        self.filter_own_reactions && self.client.self_user_id().as_deref() == Some(user_id)
    }

    async fn resolve_attachments(&self, refs: &[RawAttachmentRef]) -> Vec<AttachmentId> {
        let mut ids = Vec::with_capacity(refs.len());
        for r in refs {
            ids.push(self.downloader.resolve(self.client.as_ref(), r).await);
        }
        ids
    }

    /// Rewrites each raw mention token in `raw.text` to `<@display_name>`,
    /// falling back to the raw id when the user isn't in `UserCache` yet.
    fn normalize_mention_syntax(&self, raw: &mut RawMessage) {
        for token in raw.raw_mentions.clone() {
            let Some(id) = extract_mention_id(&token) else { continue };
            let display = self
                .manager
                .users()
                .get(&UserId::from(id.clone()))
                .map(|u| u.display_name)
                .unwrap_or(id);
            raw.text = raw.text.replace(token.as_str(), &format!("<@{display}>"));
        }
    }

    /// Converts one `ConversationDelta` into the ordered sequence of
    /// `BotRequestEvent`s the history-first rule and event ordering demand.
    async fn emit_delta(&self, delta: ConversationDelta, bus: &mpsc::Sender<BotRequestEvent>) {
        if delta.is_empty() {
            return;
        }
        let Some(conv_id) = delta.conversation_id.clone() else { return };

        if delta.conversation_started {
            self.emit_history_first(&conv_id, bus).await;
        }

        for msg in delta.added_messages {
            let _ = bus.send(BotRequestEvent::MessageReceived(msg)).await;
        }
        for (message_id, new_text) in delta.edited_messages {
            let _ = bus.send(BotRequestEvent::MessageUpdated { conversation_id: conv_id.clone(), message_id, new_text }).await;
        }
        for message_id in delta.deleted_messages {
            let _ = bus.send(BotRequestEvent::MessageDeleted { conversation_id: conv_id.clone(), message_id }).await;
        }
        for (message_id, user_id, emoji) in delta.added_reactions {
            let _ = bus.send(BotRequestEvent::ReactionAdded { conversation_id: conv_id.clone(), message_id, user_id, emoji }).await;
        }
        for (message_id, user_id, emoji) in delta.removed_reactions {
            let _ = bus.send(BotRequestEvent::ReactionRemoved { conversation_id: conv_id.clone(), message_id, user_id, emoji }).await;
        }
        for message_id in delta.pins {
            let _ = bus.send(BotRequestEvent::MessagePinned { conversation_id: conv_id.clone(), message_id }).await;
        }
        for message_id in delta.unpins {
            let _ = bus.send(BotRequestEvent::MessageUnpinned { conversation_id: conv_id.clone(), message_id }).await;
        }
    }

    async fn emit_history_first(&self, conv_id: &ConversationId, bus: &mpsc::Sender<BotRequestEvent>) {
        let platform_conversation_id = self
            .manager
            .get(conv_id)
            .map(|c| c.platform_conversation_id.as_str().to_string())
            .unwrap_or_default();

        let history = match self
            .history
            .fetch(
                &self.manager,
                self.client.as_ref(),
                conv_id,
                &platform_conversation_id,
                self.history_bootstrap_limit,
                Some(Utc::now().timestamp_millis()),
                None,
            )
            .await
        {
            Ok(h) => h,
            Err(e) => {
                warn!(conversation_id = %conv_id, error = %e, "history bootstrap failed, starting with empty history");
                Vec::new()
            }
        };

        let _ = bus.send(BotRequestEvent::ConversationStarted { conversation_id: conv_id.clone(), history }).await;
        self.manager.clear_just_started(conv_id);
    }
}

/// Strips a platform mention token (`<@123>`, `<@!123>`) down to the bare id.
fn extract_mention_id(token: &str) -> Option<String> {
    let inner = token.strip_prefix("<@")?.strip_suffix('>')?;
    Some(inner.trim_start_matches('!').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_cache::{AttachmentCache, ConversationType, Mention, MessageCache, UserCache};
    use relay_conversations::DefaultThreadHandler;
    use relay_platform::test_support::FakeClient;
    use relay_ratelimit::RateLimiter;

    struct PassthroughBuilder;
    impl relay_conversations::MessageBuilder for PassthroughBuilder {
        fn normalize_mentions(&self, _raw: &RawMessage) -> Vec<Mention> {
            Vec::new()
        }
    }

    fn processor(client: Arc<FakeClient>, filter_own_reactions: bool) -> IncomingEventProcessor {
        let messages = Arc::new(MessageCache::new(1000, 1000, 72));
        let users = Arc::new(UserCache::new(256, 72));
        let attachments = Arc::new(AttachmentCache::new(std::env::temp_dir(), 100, 72));
        let manager = Arc::new(ConversationManager::new(messages, users, attachments, Box::new(DefaultThreadHandler), Box::new(PassthroughBuilder)));
        let downloader = Arc::new(Downloader::new(manager.attachments().clone(), 8));
        let history = Arc::new(HistoryFetcher::new(Arc::new(RateLimiter::new(1000, 1000, 1000)), 10, true));
        IncomingEventProcessor::new(manager, downloader, history, client, Arc::new(EmojiConverter::new()), filter_own_reactions, 20)
    }

    fn raw(conv: &str, msg: &str, text: &str) -> RawMessage {
        RawMessage {
            platform_message_id: msg.to_string(),
            platform_conversation_id: conv.to_string(),
            platform_thread_id: None,
            sender_id: "u1".to_string(),
            sender_display_name: "U1".to_string(),
            sender_is_bot: false,
            text: text.to_string(),
            raw_mentions: vec![],
            attachments: vec![],
            is_direct_message: false,
            is_pinned: false,
            timestamp_ms: 1,
        }
    }

    #[tokio::test]
    async fn new_conversation_emits_history_first_then_message() {
        let client = Arc::new(FakeClient::new());
        let proc = processor(client, true);
        let (tx, mut rx) = mpsc::channel(16);

        proc.handle_message_received(raw("g/c", "m1", "hi"), &tx).await;
        drop(tx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BotRequestEvent::ConversationStarted { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, BotRequestEvent::MessageReceived(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn own_reaction_is_filtered_by_default() {
        let client = Arc::new(FakeClient::new());
        client.set_self_user_id("bot-1");
        let proc = processor(client, true);
        let (tx, mut rx) = mpsc::channel(16);

        proc.handle_message_received(raw("g/c", "m1", "hi"), &tx).await;
        let _ = rx.recv().await; // conversation_started
        let _ = rx.recv().await; // message_received

        proc.handle_reaction_added("m1".to_string(), "bot-1".to_string(), "thumbsup".to_string(), &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reaction_on_framework_message_is_filtered() {
        let client = Arc::new(FakeClient::new());
        let proc = processor(client, true);
        let (tx, mut rx) = mpsc::channel(16);

        proc.manager
            .add_to_conversation(raw("g/c", "sent-by-bot", "hello"), ConversationType::Channel, vec![], Origin::Framework)
            .await;

        // A different, non-bot user reacting to a message the bot sent must
        // not surface — the loopback filter drops it by subject, not actor.
        proc.handle_reaction_added("sent-by-bot".to_string(), "human-1".to_string(), "thumbsup".to_string(), &tx).await;
        proc.handle_reaction_removed("sent-by-bot".to_string(), "human-1".to_string(), "thumbsup".to_string(), &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn extract_mention_id_strips_nickname_bang() {
        assert_eq!(extract_mention_id("<@!42>"), Some("42".to_string()));
        assert_eq!(extract_mention_id("<@42>"), Some("42".to_string()));
        assert_eq!(extract_mention_id("not a mention"), None);
    }
}
