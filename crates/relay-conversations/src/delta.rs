use relay_cache::{CachedMessage, UserInfo};
use relay_core::{ConversationId, MessageId, UserId};

/// The set of state changes synthesized from a single platform event,
/// handed back to the `IncomingEventProcessor` to translate into one or
/// more normalized `bot_request` events.
#[derive(Debug, Default)]
pub struct ConversationDelta {
    pub conversation_id: Option<ConversationId>,
    pub conversation_started: bool,
    /// Set alongside `conversation_started` — tells the processor to run
    /// the history-first rule before emitting anything else for this
    /// conversation.
    pub fetch_history_needed: bool,
    pub added_messages: Vec<CachedMessage>,
    pub edited_messages: Vec<(MessageId, String)>,
    pub deleted_messages: Vec<MessageId>,
    pub added_reactions: Vec<(MessageId, UserId, String)>,
    pub removed_reactions: Vec<(MessageId, UserId, String)>,
    pub pins: Vec<MessageId>,
    pub unpins: Vec<MessageId>,
    pub users_to_upsert: Vec<UserInfo>,
}

impl ConversationDelta {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.conversation_started
            && self.added_messages.is_empty()
            && self.edited_messages.is_empty()
            && self.deleted_messages.is_empty()
            && self.added_reactions.is_empty()
            && self.removed_reactions.is_empty()
            && self.pins.is_empty()
            && self.unpins.is_empty()
    }
}
