use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::{RawAttachmentRef, RawEvent, RawMessage};

/// A mention to attach to an outgoing message, in the form the
/// `OutgoingEventProcessor` passes down after resolving framework-side
/// mention syntax back to platform-native form.
#[derive(Debug, Clone)]
pub enum OutgoingMention {
    User(String),
    All,
}

/// An attachment to upload alongside an outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The narrow interface every platform adapter implements. Deliberately
/// small so webhook-only, long-polling (Zulip-style), and gateway/socket
/// transports (Slack, Discord, Telegram) all fit behind it without the
/// core knowing which one it's driving.
///
/// Reconnection policy is the implementation's own responsibility; it must
/// report `is_alive` faithfully so the `EventBus`'s connection monitor can
/// decide when to emit `disconnect` and terminate the process.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Stable lowercase identifier matching `adapter.adapter_type` in config.
    fn adapter_type(&self) -> &'static str;

    /// The platform's own user id for this bot, once known. `None` before
    /// `connect()` has completed its handshake. Used by the incoming
    /// processor's own-reaction filter (`filter_own_reactions`).
    fn self_user_id(&self) -> Option<String> {
        None
    }

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn is_alive(&self) -> bool;

    /// Hand over the single-consumer receiver for this client's raw event
    /// stream. Must be called exactly once per connection; implementations
    /// panic or return `None` on a second call rather than silently
    /// fork the stream.
    fn take_event_stream(&self) -> Option<mpsc::Receiver<RawEvent>>;

    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        mentions: &[OutgoingMention],
        attachments: &[OutgoingAttachment],
    ) -> Result<Vec<String>>;

    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()>;
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;
    async fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()>;
    async fn pin_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;
    async fn unpin_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn fetch_history(
        &self,
        conversation_id: &str,
        limit: usize,
        before_ms: Option<i64>,
        after_ms: Option<i64>,
    ) -> Result<Vec<RawMessage>>;

    async fn download_attachment(&self, attachment_ref: &RawAttachmentRef) -> Result<Vec<u8>>;
    async fn upload_attachment(&self, conversation_id: &str, name: &str, bytes: &[u8]) -> Result<String>;
}
