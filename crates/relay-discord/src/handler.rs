use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serenity::async_trait;
use serenity::model::channel::{Message, Reaction};
use serenity::model::event::MessageUpdateEvent;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::prelude::{Context, EventHandler};
use tokio::sync::mpsc;
use tracing::info;

use relay_platform::RawEvent;

use crate::convert::to_raw_message;

/// Forwards serenity gateway events onto the `RawEvent` channel a
/// `DiscordClient` hands out via `take_event_stream`. Holds no business
/// logic of its own — translation only.
pub struct DiscordEventHandler {
    pub event_tx: mpsc::Sender<RawEvent>,
    pub alive: Arc<AtomicBool>,
    pub bot_id: OnceLock<UserId>,
    pub own_user_id: Arc<OnceLock<String>>,
}

#[async_trait]
impl EventHandler for DiscordEventHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        self.own_user_id.set(ready.user.id.to_string()).ok();
        self.alive.store(true, Ordering::SeqCst);
        info!(name = %ready.user.name, "discord gateway connected");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if let Some(bot_id) = self.bot_id.get() {
            if msg.author.id == *bot_id {
                return;
            }
        }
        let raw = to_raw_message(&ctx, &msg);
        let _ = self.event_tx.send(RawEvent::MessageReceived(raw)).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Message>,
        new: Option<Message>,
        _event: MessageUpdateEvent,
    ) {
        let Some(new) = new else { return };
        if let Some(bot_id) = self.bot_id.get() {
            if new.author.id == *bot_id {
                return;
            }
        }
        let raw = to_raw_message(&ctx, &new);
        let _ = self.event_tx.send(RawEvent::MessageUpdated(raw)).await;
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        let raw = RawEvent::MessageDeleted {
            platform_message_id: deleted_message_id.to_string(),
            platform_conversation_id: channel_id.to_string(),
        };
        let _ = self.event_tx.send(raw).await;
    }

    async fn reaction_add(&self, _ctx: Context, reaction: Reaction) {
        let Some(user_id) = reaction.user_id else { return };
        let raw = RawEvent::ReactionAdded {
            platform_message_id: reaction.message_id.to_string(),
            platform_conversation_id: reaction.channel_id.to_string(),
            user_id: user_id.to_string(),
            emoji: reaction.emoji.to_string(),
        };
        let _ = self.event_tx.send(raw).await;
    }

    async fn reaction_remove(&self, _ctx: Context, reaction: Reaction) {
        let Some(user_id) = reaction.user_id else { return };
        let raw = RawEvent::ReactionRemoved {
            platform_message_id: reaction.message_id.to_string(),
            platform_conversation_id: reaction.channel_id.to_string(),
            user_id: user_id.to_string(),
            emoji: reaction.emoji.to_string(),
        };
        let _ = self.event_tx.send(raw).await;
    }
}
