use serde::{Deserialize, Serialize};

/// A reference to an attachment as the platform describes it before it has
/// been downloaded — just enough to decide whether/how to fetch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAttachmentRef {
    pub platform_attachment_id: String,
    pub file_name: String,
    pub file_extension: String,
    pub size_bytes: u64,
    /// Opaque platform-specific handle the `PlatformClient` uses to fetch
    /// the bytes (a URL, an attachment object id, ...). Never shown to the
    /// framework directly.
    pub download_ref: String,
}

/// A message as a platform's raw event/API response gives it, before the
/// `MessageBuilder` translates it into a `CachedMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub platform_message_id: String,
    pub platform_conversation_id: String,
    pub platform_thread_id: Option<String>,
    pub sender_id: String,
    pub sender_display_name: String,
    pub sender_is_bot: bool,
    pub text: String,
    /// Raw mention tokens exactly as the platform encodes them (e.g.
    /// `<@123456>`), left for the `MessageBuilder` to normalize.
    pub raw_mentions: Vec<String>,
    pub attachments: Vec<RawAttachmentRef>,
    pub is_direct_message: bool,
    /// Current pin state as the platform reports it, so `update_conversation`
    /// can diff it against the cached copy and synthesize a pin/unpin delta
    /// for edit notifications that actually carry a pin change.
    pub is_pinned: bool,
    pub timestamp_ms: i64,
}

/// A single raw event a `PlatformClient` emits on its `stream_events`
/// channel. One variant per incoming platform event type the
/// `IncomingEventProcessor` dispatches on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawEvent {
    MessageReceived(RawMessage),
    /// On platforms where an "edit" notification may actually represent a
    /// reaction or pin change bundled into the same event (Telegram,
    /// Discord), the full updated message is given so the
    /// `ConversationManager` can diff it against the cached copy.
    MessageUpdated(RawMessage),
    MessageDeleted {
        platform_message_id: String,
        platform_conversation_id: String,
    },
    ReactionAdded {
        platform_message_id: String,
        platform_conversation_id: String,
        user_id: String,
        emoji: String,
    },
    ReactionRemoved {
        platform_message_id: String,
        platform_conversation_id: String,
        user_id: String,
        emoji: String,
    },
}
