use relay_cache::{CachedAttachment, CachedMessage};
use relay_core::{ConversationId, MessageId, UserId};

/// Adapter → framework event, normalized from a `ConversationDelta` (or
/// emitted directly by the connection monitor). `relay-eventbus` frames
/// this as the wire-level `bot_request {adapter_type, event_type, data}`.
#[derive(Debug, Clone)]
pub enum BotRequestEvent {
    Connect,
    Disconnect,
    ConversationStarted {
        conversation_id: ConversationId,
        history: Vec<CachedMessage>,
    },
    MessageReceived(CachedMessage),
    MessageUpdated {
        conversation_id: ConversationId,
        message_id: MessageId,
        new_text: String,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    ReactionAdded {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },
    ReactionRemoved {
        conversation_id: ConversationId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },
    MessagePinned {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    MessageUnpinned {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

/// A framework → adapter request, already decoded from its wire shape by
/// `relay-eventbus`. `event_type` selects the `OutgoingEventProcessor`
/// handler; `data` is the type-specific payload.
#[derive(Debug, Clone)]
pub struct OutgoingEvent {
    pub event_type: OutgoingEventType,
    pub conversation_id: ConversationId,
    pub text: Option<String>,
    pub message_id: Option<MessageId>,
    pub mentions: Vec<relay_platform::OutgoingMention>,
    pub attachments: Vec<OutgoingAttachmentPayload>,
    pub emoji: Option<String>,
    pub history_limit: Option<usize>,
    pub history_before_ms: Option<i64>,
    pub history_after_ms: Option<i64>,
    pub attachment_id: Option<relay_core::AttachmentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingEventType {
    SendMessage,
    EditMessage,
    DeleteMessage,
    AddReaction,
    RemoveReaction,
    FetchHistory,
    FetchAttachment,
    PinMessage,
    UnpinMessage,
}

/// A base64-framed attachment as it arrives in a `bot_response` payload.
#[derive(Debug, Clone)]
pub struct OutgoingAttachmentPayload {
    pub file_name: String,
    pub content_base64: String,
}

/// Result of dispatching one `OutgoingEvent`, mapped by `relay-eventbus`
/// onto `request_success`/`request_failed`.
#[derive(Debug, Clone)]
pub enum OutgoingResult {
    MessageIds(Vec<String>),
    History(Vec<CachedMessage>),
    Attachment(CachedAttachment, Option<String>),
    Ack,
    Error(String),
}
