use serenity::model::channel::{ChannelType, Message};
use serenity::prelude::Context;

use relay_platform::{RawAttachmentRef, RawMessage};

/// Remove a leading `<@bot_id>` mention from a message's text, the way a
/// guild message that pings the bot to get its attention usually opens.
pub fn strip_mention(s: &str) -> &str {
    let trimmed = s.trim_start();
    if trimmed.starts_with("<@") {
        if let Some(end) = trimmed.find('>') {
            return trimmed[end + 1..].trim_start();
        }
    }
    trimmed
}

/// A message's own channel is the conversation unless that channel is
/// itself a Discord thread, in which case the thread's parent channel is
/// the conversation and the channel is the thread.
pub fn resolve_conversation_and_thread(ctx: &Context, msg: &Message) -> (String, Option<String>) {
    let Some(guild_id) = msg.guild_id else {
        return (msg.channel_id.to_string(), None);
    };

    let is_thread = ctx
        .cache
        .guild(guild_id)
        .and_then(|guild| guild.channels.get(&msg.channel_id).map(|c| c.kind))
        .map(|kind| matches!(kind, ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread))
        .unwrap_or(false);

    if !is_thread {
        return (msg.channel_id.to_string(), None);
    }

    let parent = ctx
        .cache
        .guild(guild_id)
        .and_then(|guild| guild.channels.get(&msg.channel_id).and_then(|c| c.parent_id))
        .map(|p| p.to_string())
        .unwrap_or_else(|| msg.channel_id.to_string());

    (parent, Some(msg.channel_id.to_string()))
}

pub fn to_raw_message(ctx: &Context, msg: &Message) -> RawMessage {
    let (platform_conversation_id, platform_thread_id) = resolve_conversation_and_thread(ctx, msg);

    RawMessage {
        platform_message_id: msg.id.to_string(),
        platform_conversation_id,
        platform_thread_id,
        sender_id: msg.author.id.to_string(),
        sender_display_name: msg.author.name.clone(),
        sender_is_bot: msg.author.bot,
        text: strip_mention(&msg.content).to_string(),
        raw_mentions: msg.mentions.iter().map(|u| format!("<@{}>", u.id)).collect(),
        attachments: msg.attachments.iter().map(to_raw_attachment_ref).collect(),
        is_direct_message: msg.guild_id.is_none(),
        is_pinned: msg.pinned,
        timestamp_ms: msg.timestamp.timestamp_millis(),
    }
}

/// Convert a message fetched via REST history (no gateway `Context`/cache
/// available) into a `RawMessage`. Thread/parent resolution is skipped —
/// history backfill favors availability over perfect thread fidelity.
pub fn to_raw_message_no_ctx(conversation_id: &str, msg: &Message) -> RawMessage {
    RawMessage {
        platform_message_id: msg.id.to_string(),
        platform_conversation_id: conversation_id.to_string(),
        platform_thread_id: None,
        sender_id: msg.author.id.to_string(),
        sender_display_name: msg.author.name.clone(),
        sender_is_bot: msg.author.bot,
        text: strip_mention(&msg.content).to_string(),
        raw_mentions: msg.mentions.iter().map(|u| format!("<@{}>", u.id)).collect(),
        attachments: msg.attachments.iter().map(to_raw_attachment_ref).collect(),
        is_direct_message: msg.guild_id.is_none(),
        is_pinned: msg.pinned,
        timestamp_ms: msg.timestamp.timestamp_millis(),
    }
}

/// Discord snowflakes encode a millisecond timestamp in their high bits;
/// the API's `before`/`after` pagination params take a message id, so a
/// time boundary has to be faked as the smallest snowflake at that instant.
pub fn snowflake_from_ms(ms: i64) -> u64 {
    const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
    let delta = (ms - DISCORD_EPOCH_MS).max(0) as u64;
    delta << 22
}

fn to_raw_attachment_ref(attachment: &serenity::model::channel::Attachment) -> RawAttachmentRef {
    let file_extension = attachment
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    RawAttachmentRef {
        platform_attachment_id: attachment.id.to_string(),
        file_name: attachment.filename.clone(),
        file_extension,
        size_bytes: attachment.size as u64,
        download_ref: attachment.url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_mention_removes_leading_ping() {
        assert_eq!(strip_mention("<@12345> hello there"), "hello there");
    }

    #[test]
    fn strip_mention_passes_through_plain_text() {
        assert_eq!(strip_mention("hello there"), "hello there");
    }
}
