use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use relay_attachments::{AttachmentError, Downloader};
use relay_cache::CacheError;
use relay_conversations::ConversationManager;
use relay_core::{ConversationId, Origin};
use relay_emoji::EmojiConverter;
use relay_platform::{OutgoingAttachment, PlatformClient, RawMessage};
use relay_ratelimit::{Operation, RateLimiter};

use crate::error::{PipelineError, Result};
use crate::event::{OutgoingEvent, OutgoingEventType, OutgoingResult};
use crate::history::HistoryFetcher;

/// Maps a decoded `OutgoingEvent` onto the matching `PlatformClient`
/// operation, rate-limiting and validating along the way. One instance
/// drives all outgoing traffic for one platform connection.
pub struct OutgoingEventProcessor {
    manager: Arc<ConversationManager>,
    client: Arc<dyn PlatformClient>,
    rate_limiter: Arc<RateLimiter>,
    downloader: Arc<Downloader>,
    history: Arc<HistoryFetcher>,
    emoji: Arc<EmojiConverter>,
    max_message_length: usize,
}

impl OutgoingEventProcessor {
    pub fn new(
        manager: Arc<ConversationManager>,
        client: Arc<dyn PlatformClient>,
        rate_limiter: Arc<RateLimiter>,
        downloader: Arc<Downloader>,
        history: Arc<HistoryFetcher>,
        emoji: Arc<EmojiConverter>,
        max_message_length: usize,
    ) -> Self {
        Self {
            manager,
            client,
            rate_limiter,
            downloader,
            history,
            emoji,
            max_message_length,
        }
    }

    pub async fn dispatch(&self, event: OutgoingEvent) -> Result<OutgoingResult> {
        let conversation = self
            .manager
            .get(&event.conversation_id)
            .ok_or_else(|| PipelineError::ConversationNotFound(event.conversation_id.to_string()))?;
        let platform_conversation_id = conversation.platform_conversation_id.as_str().to_string();

        match event.event_type {
            OutgoingEventType::SendMessage => self.send_message(event, &platform_conversation_id).await,
            OutgoingEventType::EditMessage => self.edit_message(event, &platform_conversation_id).await,
            OutgoingEventType::DeleteMessage => self.delete_message(event, &platform_conversation_id).await,
            OutgoingEventType::AddReaction => self.add_reaction(event, &platform_conversation_id).await,
            OutgoingEventType::RemoveReaction => self.remove_reaction(event, &platform_conversation_id).await,
            OutgoingEventType::FetchHistory => self.fetch_history(event, &platform_conversation_id).await,
            OutgoingEventType::FetchAttachment => self.fetch_attachment(event).await,
            OutgoingEventType::PinMessage => self.pin_message(event, &platform_conversation_id).await,
            OutgoingEventType::UnpinMessage => self.unpin_message(event, &platform_conversation_id).await,
        }
    }

    /// Splits `text` into at most `max_message_length`-codepoint chunks
    /// before handing any of them to the platform client — every platform
    /// gets this for free rather than re-implementing it behind the
    /// narrow `PlatformClient` interface. Attachments and the mention
    /// prefix ride along with the first chunk only; later chunks are
    /// plain continuation messages.
    async fn send_message(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let text = event.text.unwrap_or_default();

        let mut attachments = Vec::with_capacity(event.attachments.len());
        for a in &event.attachments {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&a.content_base64)
                .map_err(|_| PipelineError::Validation(format!("attachment {} is not valid base64", a.file_name)))?;
            attachments.push(OutgoingAttachment { file_name: a.file_name.clone(), bytes });
        }

        let chunks = crate::chunk::split_chunks(&text, self.max_message_length);
        let empty_attachments: Vec<OutgoingAttachment> = Vec::new();
        let empty_mentions: Vec<relay_platform::OutgoingMention> = Vec::new();

        let mut message_ids = Vec::with_capacity(chunks.len());
        for (i, piece) in chunks.iter().enumerate() {
            let piece_attachments = if i == 0 { &attachments } else { &empty_attachments };
            let piece_mentions = if i == 0 { &event.mentions } else { &empty_mentions };
            self.rate_limiter.limit_request(Operation::Send, Some(&event.conversation_id)).await;
            let ids = self.client.send_message(platform_conversation_id, piece, piece_mentions, piece_attachments).await?;
            message_ids.extend(ids);
        }

        self.record_framework_send(&event.conversation_id, &message_ids, &text).await;

        Ok(OutgoingResult::MessageIds(message_ids))
    }

    async fn edit_message(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let text = event.text.unwrap_or_default();
        if text.chars().count() > self.max_message_length {
            return Err(PipelineError::Validation(format!(
                "edit text exceeds max_message_length ({} > {})",
                text.chars().count(),
                self.max_message_length
            )));
        }
        if !event.attachments.is_empty() {
            return Err(PipelineError::Unsupported("attachments are not supported on edit_message".to_string()));
        }
        let message_id = event.message_id.ok_or_else(|| PipelineError::Validation("edit_message requires message_id".to_string()))?;

        self.rate_limiter.limit_request(Operation::Edit, Some(&event.conversation_id)).await;
        self.client.edit_message(platform_conversation_id, message_id.as_str(), &text).await?;

        // Carry over the cached pin state rather than hardcoding `false` —
        // this is a text edit, not a pin change, and `update_conversation`
        // now diffs `is_pinned` to synthesize pin/unpin deltas.
        let is_pinned = self.manager.messages().get(&message_id).map(|m| m.is_pinned).unwrap_or(false);
        let raw = self.synthetic_raw(platform_conversation_id, message_id.as_str(), &text, is_pinned);
        self.manager.update_conversation(&event.conversation_id, &raw, vec![]).await;

        Ok(OutgoingResult::Ack)
    }

    async fn delete_message(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let message_id = event.message_id.ok_or_else(|| PipelineError::Validation("delete_message requires message_id".to_string()))?;

        self.rate_limiter.limit_request(Operation::Delete, Some(&event.conversation_id)).await;
        self.client.delete_message(platform_conversation_id, message_id.as_str()).await?;
        self.manager.delete_from_conversation(&event.conversation_id, &message_id).await;

        Ok(OutgoingResult::Ack)
    }

    async fn add_reaction(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let message_id = event.message_id.ok_or_else(|| PipelineError::Validation("add_reaction requires message_id".to_string()))?;
        let emoji_name = event.emoji.ok_or_else(|| PipelineError::Validation("add_reaction requires emoji".to_string()))?;
        let unicode = self.emoji.to_unicode(&emoji_name);

        self.rate_limiter.limit_request(Operation::Reaction, Some(&event.conversation_id)).await;
        self.client.add_reaction(platform_conversation_id, message_id.as_str(), &unicode).await?;
        self.manager.add_reaction(&event.conversation_id, &message_id, self.bot_user_id(), unicode).await;

        Ok(OutgoingResult::Ack)
    }

    async fn remove_reaction(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let message_id = event.message_id.ok_or_else(|| PipelineError::Validation("remove_reaction requires message_id".to_string()))?;
        let emoji_name = event.emoji.ok_or_else(|| PipelineError::Validation("remove_reaction requires emoji".to_string()))?;
        let unicode = self.emoji.to_unicode(&emoji_name);

        self.rate_limiter.limit_request(Operation::Reaction, Some(&event.conversation_id)).await;
        self.client.remove_reaction(platform_conversation_id, message_id.as_str(), &unicode).await?;
        self.manager.remove_reaction(&event.conversation_id, &message_id, self.bot_user_id(), unicode).await;

        Ok(OutgoingResult::Ack)
    }

    async fn pin_message(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let message_id = event.message_id.ok_or_else(|| PipelineError::Validation("pin_message requires message_id".to_string()))?;

        self.rate_limiter.limit_request(Operation::Pin, Some(&event.conversation_id)).await;
        self.client.pin_message(platform_conversation_id, message_id.as_str()).await?;
        self.manager.pin_message(&event.conversation_id, &message_id).await;

        Ok(OutgoingResult::Ack)
    }

    async fn unpin_message(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let message_id = event.message_id.ok_or_else(|| PipelineError::Validation("unpin_message requires message_id".to_string()))?;

        self.rate_limiter.limit_request(Operation::Pin, Some(&event.conversation_id)).await;
        self.client.unpin_message(platform_conversation_id, message_id.as_str()).await?;
        self.manager.unpin_message(&event.conversation_id, &message_id).await;

        Ok(OutgoingResult::Ack)
    }

    async fn fetch_history(&self, event: OutgoingEvent, platform_conversation_id: &str) -> Result<OutgoingResult> {
        let limit = event.history_limit.unwrap_or(20);
        let history = self
            .history
            .fetch(
                &self.manager,
                self.client.as_ref(),
                &event.conversation_id,
                platform_conversation_id,
                limit,
                event.history_before_ms,
                event.history_after_ms,
            )
            .await?;
        Ok(OutgoingResult::History(history))
    }

    /// Cache-only: never calls the platform client. Missing or unprocessable
    /// attachments fail rather than falling back to a fresh download.
    async fn fetch_attachment(&self, event: OutgoingEvent) -> Result<OutgoingResult> {
        let attachment_id = event.attachment_id.ok_or_else(|| PipelineError::Validation("fetch_attachment requires attachment_id".to_string()))?;

        self.rate_limiter.limit_request(Operation::FetchAttachment, Some(&event.conversation_id)).await;

        let attachment = self
            .manager
            .attachments()
            .get(&attachment_id)
            .ok_or_else(|| PipelineError::Attachment(AttachmentError::Cache(CacheError::AttachmentNotFound(attachment_id.to_string()))))?;

        let content = self
            .downloader
            .fetch_base64(&attachment_id)
            .await
            .ok_or_else(|| PipelineError::Attachment(AttachmentError::Cache(CacheError::AttachmentNotFound(attachment_id.to_string()))))?;

        Ok(OutgoingResult::Attachment(attachment, Some(content)))
    }

    fn bot_user_id(&self) -> relay_core::UserId {
        self.client.self_user_id().map(relay_core::UserId::from).unwrap_or_else(|| relay_core::UserId::from("bot"))
    }

    fn synthetic_raw(&self, platform_conversation_id: &str, platform_message_id: &str, text: &str, is_pinned: bool) -> RawMessage {
        RawMessage {
            platform_message_id: platform_message_id.to_string(),
            platform_conversation_id: platform_conversation_id.to_string(),
            platform_thread_id: None,
            sender_id: self.client.self_user_id().unwrap_or_else(|| "bot".to_string()),
            sender_display_name: "bot".to_string(),
            sender_is_bot: true,
            text: text.to_string(),
            raw_mentions: vec![],
            attachments: vec![],
            is_direct_message: false,
            is_pinned,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Records a successful send into the manager under `origin=framework`.
    /// Needed on platforms (including our Discord reference client, whose
    /// gateway handler filters the bot's own messages out of the incoming
    /// stream) where the send path is the only place this state is ever
    /// observed — without it, a later `edit_message`/`delete_message` for
    /// this id would find nothing cached.
    async fn record_framework_send(&self, conversation_id: &ConversationId, message_ids: &[String], text: &str) {
        let Some(first_id) = message_ids.first() else { return };
        let Some(conversation) = self.manager.get(conversation_id) else { return };
        let raw = self.synthetic_raw(conversation.platform_conversation_id.as_str(), first_id, text, false);
        self.manager.add_to_conversation(raw, conversation.conversation_type, vec![], Origin::Framework).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_cache::{AttachmentCache, ConversationType, Mention, MessageCache, UserCache};
    use relay_conversations::DefaultThreadHandler;
    use relay_platform::test_support::FakeClient;

    struct PassthroughBuilder;
    impl relay_conversations::MessageBuilder for PassthroughBuilder {
        fn normalize_mentions(&self, _raw: &RawMessage) -> Vec<Mention> {
            Vec::new()
        }
    }

    fn processor(client: Arc<FakeClient>) -> (Arc<ConversationManager>, OutgoingEventProcessor) {
        let messages = Arc::new(MessageCache::new(1000, 1000, 72));
        let users = Arc::new(UserCache::new(256, 72));
        let attachments = Arc::new(AttachmentCache::new(std::env::temp_dir(), 100, 72));
        let manager = Arc::new(ConversationManager::new(messages, users, attachments, Box::new(DefaultThreadHandler), Box::new(PassthroughBuilder)));
        let downloader = Arc::new(Downloader::new(manager.attachments().clone(), 8));
        let rate_limiter = Arc::new(RateLimiter::new(1000, 1000, 1000));
        let history = Arc::new(HistoryFetcher::new(Arc::clone(&rate_limiter), 10, true));
        let proc = OutgoingEventProcessor::new(
            Arc::clone(&manager),
            client,
            rate_limiter,
            downloader,
            history,
            Arc::new(EmojiConverter::new()),
            2000,
        );
        (manager, proc)
    }

    fn event(event_type: OutgoingEventType, conversation_id: ConversationId) -> OutgoingEvent {
        OutgoingEvent {
            event_type,
            conversation_id,
            text: None,
            message_id: None,
            mentions: vec![],
            attachments: vec![],
            emoji: None,
            history_limit: None,
            history_before_ms: None,
            history_after_ms: None,
            attachment_id: None,
        }
    }

    async fn seed_conversation(manager: &ConversationManager) -> ConversationId {
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
        delta.conversation_id.unwrap()
    }

    #[tokio::test]
    async fn send_message_over_length_splits_into_multiple_messages() {
        let client = Arc::new(FakeClient::new());
        let (manager, proc) = processor(client);
        let conv_id = seed_conversation(&manager).await;

        let text = format!("{} {}", "a".repeat(1500), "b".repeat(1500));
        let mut ev = event(OutgoingEventType::SendMessage, conv_id);
        ev.text = Some(text.clone());
        let result = proc.dispatch(ev).await.unwrap();
        let ids = match result {
            OutgoingResult::MessageIds(ids) => ids,
            _ => panic!("expected message ids"),
        };

        let expected = (text.chars().count() as f64 / 2000.0).ceil() as usize;
        assert_eq!(ids.len(), expected);
    }

    #[tokio::test]
    async fn send_message_records_framework_origin() {
        let client = Arc::new(FakeClient::new());
        let (manager, proc) = processor(client);
        let conv_id = seed_conversation(&manager).await;

        let mut ev = event(OutgoingEventType::SendMessage, conv_id.clone());
        ev.text = Some("hello".to_string());
        let result = proc.dispatch(ev).await.unwrap();
        let ids = match result {
            OutgoingResult::MessageIds(ids) => ids,
            _ => panic!("expected message ids"),
        };

        let cached = manager.messages().get(&relay_core::MessageId::from(ids[0].clone())).unwrap();
        assert!(cached.origin.is_framework());
    }

    #[tokio::test]
    async fn edit_message_over_length_is_rejected() {
        let client = Arc::new(FakeClient::new());
        let (manager, proc) = processor(client);
        let conv_id = seed_conversation(&manager).await;

        let mut ev = event(OutgoingEventType::EditMessage, conv_id);
        ev.message_id = Some(relay_core::MessageId::from("seed"));
        ev.text = Some("x".repeat(3000));
        let result = proc.dispatch(ev).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_conversation_is_rejected() {
        let client = Arc::new(FakeClient::new());
        let (_manager, proc) = processor(client);
        let ev = event(OutgoingEventType::SendMessage, ConversationId::new());
        let result = proc.dispatch(ev).await;
        assert!(matches!(result, Err(PipelineError::ConversationNotFound(_))));
    }

    #[tokio::test]
    async fn fetch_attachment_missing_fails() {
        let client = Arc::new(FakeClient::new());
        let (manager, proc) = processor(client);
        let conv_id = seed_conversation(&manager).await;

        let mut ev = event(OutgoingEventType::FetchAttachment, conv_id);
        ev.attachment_id = Some(relay_core::AttachmentId::from("nope"));
        let result = proc.dispatch(ev).await;
        assert!(result.is_err());
    }
}
