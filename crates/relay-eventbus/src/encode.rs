use std::sync::Arc;

use serde_json::{json, Value};

use relay_attachments::Downloader;
use relay_conversations::ConversationManager;
use relay_core::AttachmentId;
use relay_pipeline::{BotRequestEvent, OutgoingResult};

/// Turns pipeline-level values into the wire JSON shapes §6.1 describes.
/// Owns `manager`/`downloader` because attachment inlining needs both: the
/// metadata lives in the cache, the base64 bytes come from the downloader's
/// on-disk store.
pub struct FrameEncoder {
    manager: Arc<ConversationManager>,
    downloader: Arc<Downloader>,
}

impl FrameEncoder {
    pub fn new(manager: Arc<ConversationManager>, downloader: Arc<Downloader>) -> Self {
        Self { manager, downloader }
    }

    /// Returns the `event_type` and `data` halves of a `bot_request` frame.
    pub async fn encode_bot_request(&self, event: &BotRequestEvent) -> (&'static str, Value) {
        match event {
            BotRequestEvent::Connect => ("connect", json!({})),
            BotRequestEvent::Disconnect => ("disconnect", json!({})),

            BotRequestEvent::ConversationStarted { conversation_id, history } => {
                let mut items = Vec::with_capacity(history.len());
                for msg in history {
                    let mut v = serde_json::to_value(msg).unwrap_or_default();
                    // never present in history payloads, per §6.1
                    self.inline_attachments(&mut v, false).await;
                    items.push(v);
                }
                ("conversation_started", json!({ "conversation_id": conversation_id.as_str(), "history": items }))
            }

            BotRequestEvent::MessageReceived(msg) => {
                let mut v = serde_json::to_value(msg).unwrap_or_default();
                self.inline_attachments(&mut v, true).await;
                ("message_received", v)
            }

            BotRequestEvent::MessageUpdated { conversation_id, message_id, new_text } => (
                "message_updated",
                json!({ "conversation_id": conversation_id.as_str(), "message_id": message_id.as_str(), "text": new_text }),
            ),

            BotRequestEvent::MessageDeleted { conversation_id, message_id } => (
                "message_deleted",
                json!({ "conversation_id": conversation_id.as_str(), "message_id": message_id.as_str() }),
            ),

            BotRequestEvent::ReactionAdded { conversation_id, message_id, user_id, emoji } => (
                "reaction_added",
                json!({
                    "conversation_id": conversation_id.as_str(),
                    "message_id": message_id.as_str(),
                    "user_id": user_id.as_str(),
                    "emoji": emoji,
                }),
            ),

            BotRequestEvent::ReactionRemoved { conversation_id, message_id, user_id, emoji } => (
                "reaction_removed",
                json!({
                    "conversation_id": conversation_id.as_str(),
                    "message_id": message_id.as_str(),
                    "user_id": user_id.as_str(),
                    "emoji": emoji,
                }),
            ),

            BotRequestEvent::MessagePinned { conversation_id, message_id } => (
                "message_pinned",
                json!({ "conversation_id": conversation_id.as_str(), "message_id": message_id.as_str() }),
            ),

            BotRequestEvent::MessageUnpinned { conversation_id, message_id } => (
                "message_unpinned",
                json!({ "conversation_id": conversation_id.as_str(), "message_id": message_id.as_str() }),
            ),
        }
    }

    /// Replaces a serialized `CachedMessage`'s `attachments` array of bare
    /// ids with base64-framed objects. `with_content` is false for history
    /// payloads per §6.1 ("never in history payloads").
    async fn inline_attachments(&self, message_json: &mut Value, with_content: bool) {
        let ids: Vec<String> = match message_json.get("attachments").and_then(Value::as_array) {
            Some(arr) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
            None => return,
        };

        let mut framed = Vec::with_capacity(ids.len());
        for id in ids {
            let attachment_id = AttachmentId::from(id);
            let Some(att) = self.manager.attachments().get(&attachment_id) else { continue };
            let mut obj = serde_json::to_value(&att).unwrap_or_default();
            if with_content && att.processable {
                if let Some(content) = self.downloader.fetch_base64(&attachment_id).await {
                    if let Value::Object(ref mut o) = obj {
                        o.insert("content".to_string(), Value::String(content));
                    }
                }
            }
            framed.push(obj);
        }

        if let Value::Object(map) = message_json {
            map.insert("attachments".to_string(), Value::Array(framed));
        }
    }
}

/// `request_queued` / `request_success` / `request_failed` all share this
/// shape: `{type, adapter_type, request_id, data?}`.
pub fn encode_status(frame_type: &str, adapter_type: &str, request_id: &str, data: Option<Value>) -> String {
    let frame = json!({
        "type": frame_type,
        "adapter_type": adapter_type,
        "request_id": request_id,
        "data": data,
    });
    serde_json::to_string(&frame).unwrap_or_default()
}

pub fn encode_bot_request_frame(adapter_type: &str, event_type: &str, data: Value) -> String {
    let frame = json!({
        "type": "bot_request",
        "adapter_type": adapter_type,
        "event_type": event_type,
        "data": data,
    });
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Maps a dispatched `OutgoingResult` onto the `data` payload of
/// `request_success`.
pub fn encode_outgoing_result(result: OutgoingResult) -> Value {
    match result {
        OutgoingResult::MessageIds(ids) => json!({ "message_ids": ids }),
        OutgoingResult::History(history) => json!({ "history": history }),
        OutgoingResult::Attachment(attachment, content) => {
            let mut v = serde_json::to_value(&attachment).unwrap_or_default();
            if let Value::Object(ref mut map) = v {
                map.insert("content".to_string(), content.map(Value::String).unwrap_or(Value::Null));
            }
            v
        }
        OutgoingResult::Ack => json!({}),
        OutgoingResult::Error(message) => json!({ "error": message }),
    }
}
