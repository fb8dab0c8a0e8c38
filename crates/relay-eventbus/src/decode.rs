use serde_json::Value;

use relay_core::{AttachmentId, ConversationId, MessageId};
use relay_pipeline::{OutgoingAttachmentPayload, OutgoingEvent, OutgoingEventType};
use relay_platform::OutgoingMention;

use crate::error::EventBusError;

/// Decodes one `bot_response {event_type, data}` frame into an
/// `OutgoingEvent`. Field names follow §3's entity shapes.
pub fn decode_outgoing_event(event_type: &str, data: &Value) -> Result<OutgoingEvent, EventBusError> {
    let event_type = match event_type {
        "send_message" => OutgoingEventType::SendMessage,
        "edit_message" => OutgoingEventType::EditMessage,
        "delete_message" => OutgoingEventType::DeleteMessage,
        "add_reaction" => OutgoingEventType::AddReaction,
        "remove_reaction" => OutgoingEventType::RemoveReaction,
        "fetch_history" => OutgoingEventType::FetchHistory,
        "fetch_attachment" => OutgoingEventType::FetchAttachment,
        "pin_message" => OutgoingEventType::PinMessage,
        "unpin_message" => OutgoingEventType::UnpinMessage,
        other => return Err(EventBusError::UnknownEventType(other.to_string())),
    };

    let conversation_id = data
        .get("conversation_id")
        .and_then(Value::as_str)
        .ok_or_else(|| EventBusError::MalformedFrame("missing conversation_id".to_string()))?;

    let text = data.get("text").and_then(Value::as_str).map(String::from);
    let message_id = data.get("message_id").and_then(Value::as_str).map(MessageId::from);
    let emoji = data.get("emoji").and_then(Value::as_str).map(String::from);
    let attachment_id = data.get("attachment_id").and_then(Value::as_str).map(AttachmentId::from);

    let history_limit = data.get("limit").and_then(Value::as_u64).map(|n| n as usize);
    let history_before_ms = data.get("before").and_then(Value::as_i64);
    let history_after_ms = data.get("after").and_then(Value::as_i64);

    let mentions = data
        .get("mentions")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|m| if m == "all" { OutgoingMention::All } else { OutgoingMention::User(m.to_string()) })
                .collect()
        })
        .unwrap_or_default();

    let attachments = data
        .get("attachments")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|a| {
                    let file_name = a.get("file_name")?.as_str()?.to_string();
                    let content_base64 = a.get("content_base64")?.as_str()?.to_string();
                    Some(OutgoingAttachmentPayload { file_name, content_base64 })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(OutgoingEvent {
        event_type,
        conversation_id: ConversationId::from(conversation_id.to_string()),
        text,
        message_id,
        mentions,
        attachments,
        emoji,
        history_limit,
        history_before_ms,
        history_after_ms,
        attachment_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_send_message() {
        let data = json!({ "conversation_id": "c1", "text": "hi", "mentions": ["u1", "all"] });
        let event = decode_outgoing_event("send_message", &data).unwrap();
        assert_eq!(event.event_type, OutgoingEventType::SendMessage);
        assert_eq!(event.text.as_deref(), Some("hi"));
        assert_eq!(event.mentions.len(), 2);
    }

    #[test]
    fn rejects_unknown_event_type() {
        let data = json!({ "conversation_id": "c1" });
        assert!(decode_outgoing_event("reboot_server", &data).is_err());
    }

    #[test]
    fn rejects_missing_conversation_id() {
        let data = json!({});
        assert!(decode_outgoing_event("send_message", &data).is_err());
    }
}
