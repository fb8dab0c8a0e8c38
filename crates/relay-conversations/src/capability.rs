use relay_cache::{CachedMessage, ConversationInfo, Mention, MessageSender, ThreadInfo};
use relay_core::{MessageId, Origin, ThreadId, UserId};
use relay_platform::RawMessage;

/// Extracts a platform-agnostic `CachedMessage` from a platform's raw
/// message shape. One implementation per platform, composed into the
/// `ConversationManager` rather than inherited — see the design note on
/// composition over base-class inheritance.
pub trait MessageBuilder: Send + Sync {
    /// Normalize a platform's raw mention tokens (e.g. Discord's
    /// `<@123456>`) into `Mention` values.
    fn normalize_mentions(&self, raw: &RawMessage) -> Vec<Mention>;

    fn build(
        &self,
        raw: &RawMessage,
        conversation_id: relay_core::ConversationId,
        thread_id: Option<ThreadId>,
        origin: Origin,
    ) -> CachedMessage {
        CachedMessage {
            message_id: MessageId::from(raw.platform_message_id.clone()),
            conversation_id,
            thread_id,
            sender: MessageSender {
                user_id: UserId::from(raw.sender_id.clone()),
                display_name: raw.sender_display_name.clone(),
            },
            text: raw.text.clone(),
            mentions: self.normalize_mentions(raw),
            attachments: Vec::new(), // filled in by the caller after download/gate
            reactions: std::collections::HashMap::new(),
            is_direct_message: raw.is_direct_message,
            is_pinned: false,
            timestamp_ms: raw.timestamp_ms,
            origin,
        }
    }
}

/// Locates or registers the thread a raw message belongs to. Platforms
/// without a thread concept (most DMs) simply return `None` for everything.
pub trait ThreadHandler: Send + Sync {
    fn resolve_thread(&self, conversation: &mut ConversationInfo, raw: &RawMessage) -> Option<ThreadId>;
}

/// Default thread handler: a message with a `platform_thread_id` gets (or
/// creates) a thread keyed by that id; otherwise the message has no thread.
pub struct DefaultThreadHandler;

impl ThreadHandler for DefaultThreadHandler {
    fn resolve_thread(&self, conversation: &mut ConversationInfo, raw: &RawMessage) -> Option<ThreadId> {
        let platform_thread_id = raw.platform_thread_id.as_ref()?;
        let thread_id = ThreadId::from(platform_thread_id.clone());

        let message_id = MessageId::from(raw.platform_message_id.clone());
        conversation
            .threads
            .entry(thread_id.clone())
            .and_modify(|t| t.member_message_ids.push(message_id.clone()))
            .or_insert_with(|| ThreadInfo::new(thread_id.clone(), message_id));

        Some(thread_id)
    }
}
