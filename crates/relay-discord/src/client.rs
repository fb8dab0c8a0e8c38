use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serenity::all::ShardManager;
use serenity::builder::{CreateAttachment, CreateMessage, EditMessage, GetMessages};
use serenity::model::gateway::GatewayIntents;
use serenity::model::id::{ChannelId, MessageId};
use serenity::model::channel::ReactionType;
use serenity::Client;
use tokio::sync::mpsc;
use tracing::warn;

use relay_core::config::DiscordConfig;
use relay_platform::{
    OutgoingAttachment, OutgoingMention, PlatformClient, PlatformError, RawAttachmentRef, RawEvent, RawMessage, Result,
};

use crate::convert::{snowflake_from_ms, to_raw_message_no_ctx};
use crate::handler::DiscordEventHandler;

/// `PlatformClient` implementation over `serenity`'s Discord gateway and
/// REST API. One instance per process; `connect` spawns the gateway loop
/// and returns immediately, `take_event_stream` hands the translated event
/// channel to the pipeline that drives it.
pub struct DiscordClient {
    config: DiscordConfig,
    alive: Arc<AtomicBool>,
    http: OnceLock<Arc<serenity::http::Http>>,
    event_tx: mpsc::Sender<RawEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    shard_manager: Mutex<Option<Arc<ShardManager>>>,
    own_user_id: Arc<OnceLock<String>>,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            config,
            alive: Arc::new(AtomicBool::new(false)),
            http: OnceLock::new(),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
            shard_manager: Mutex::new(None),
            own_user_id: Arc::new(OnceLock::new()),
        }
    }

    fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
    }

    async fn build_client(&self) -> std::result::Result<Client, serenity::Error> {
        let handler = DiscordEventHandler {
            event_tx: self.event_tx.clone(),
            alive: Arc::clone(&self.alive),
            bot_id: OnceLock::new(),
            own_user_id: Arc::clone(&self.own_user_id),
        };
        Client::builder(&self.config.bot_token, Self::intents()).event_handler(handler).await
    }

    fn http(&self) -> Result<&Arc<serenity::http::Http>> {
        self.http.get().ok_or_else(|| PlatformError::Transient("discord client not connected".to_string()))
    }

    fn channel_id(conversation_id: &str) -> Result<ChannelId> {
        conversation_id
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord channel id: {conversation_id}")))
    }

    fn mention_prefix(mentions: &[OutgoingMention]) -> String {
        if mentions.is_empty() {
            return String::new();
        }
        let mut prefix = String::new();
        for mention in mentions {
            match mention {
                OutgoingMention::User(id) => prefix.push_str(&format!("<@{id}> ")),
                OutgoingMention::All => prefix.push_str("@everyone "),
            }
        }
        prefix
    }
}

fn to_platform_error(e: serenity::Error) -> PlatformError {
    match &e {
        serenity::Error::Http(_) => PlatformError::Transient(e.to_string()),
        _ => PlatformError::Permanent(e.to_string()),
    }
}

#[async_trait]
impl PlatformClient for DiscordClient {
    fn adapter_type(&self) -> &'static str {
        "discord"
    }

    fn self_user_id(&self) -> Option<String> {
        self.own_user_id.get().cloned()
    }

    async fn connect(&self) -> Result<()> {
        let mut client = self.build_client().await.map_err(|e| PlatformError::Permanent(e.to_string()))?;
        self.http.set(Arc::clone(&client.http)).ok();
        *self.shard_manager.lock().unwrap() = Some(Arc::clone(&client.shard_manager));

        let alive = Arc::clone(&self.alive);
        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                warn!(error = %e, "discord gateway loop ended");
            }
            alive.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(manager) = self.shard_manager.lock().unwrap().clone() {
            manager.shutdown_all().await;
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn take_event_stream(&self) -> Option<mpsc::Receiver<RawEvent>> {
        self.event_rx.lock().unwrap().take()
    }

    /// `OutgoingEventProcessor` has already split `text` to
    /// `max_message_length` codepoints before this is called, so this is
    /// always exactly one platform message.
    async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        mentions: &[OutgoingMention],
        attachments: &[OutgoingAttachment],
    ) -> Result<Vec<String>> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;

        let full_text = format!("{}{}", Self::mention_prefix(mentions), text);
        let mut builder = CreateMessage::new().content(full_text);
        for attachment in attachments {
            builder = builder.add_file(CreateAttachment::bytes(attachment.bytes.clone(), attachment.file_name.clone()));
        }
        let sent = channel_id.send_message(http.as_ref(), builder).await.map_err(to_platform_error)?;
        Ok(vec![sent.id.to_string()])
    }

    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;
        let msg_id: MessageId = message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord message id: {message_id}")))?;

        channel_id
            .edit_message(http.as_ref(), msg_id, EditMessage::new().content(text))
            .await
            .map_err(to_platform_error)?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;
        let msg_id: MessageId = message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord message id: {message_id}")))?;

        channel_id.delete_message(http.as_ref(), msg_id).await.map_err(to_platform_error)?;
        Ok(())
    }

    async fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;
        let msg_id: MessageId = message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord message id: {message_id}")))?;

        let reaction = ReactionType::Unicode(emoji.to_string());
        http.create_reaction(channel_id, msg_id, &reaction).await.map_err(to_platform_error)?;
        Ok(())
    }

    async fn remove_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;
        let msg_id: MessageId = message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord message id: {message_id}")))?;

        let reaction = ReactionType::Unicode(emoji.to_string());
        http.delete_reaction_me(channel_id, msg_id, &reaction).await.map_err(to_platform_error)?;
        Ok(())
    }

    async fn pin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;
        let msg_id: MessageId = message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord message id: {message_id}")))?;

        channel_id.pin(http.as_ref(), msg_id).await.map_err(to_platform_error)?;
        Ok(())
    }

    async fn unpin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;
        let msg_id: MessageId = message_id
            .parse::<u64>()
            .map(MessageId::new)
            .map_err(|_| PlatformError::Permanent(format!("invalid discord message id: {message_id}")))?;

        channel_id.unpin(http.as_ref(), msg_id).await.map_err(to_platform_error)?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        conversation_id: &str,
        limit: usize,
        before_ms: Option<i64>,
        after_ms: Option<i64>,
    ) -> Result<Vec<RawMessage>> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;

        let mut builder = GetMessages::new().limit(limit.min(100) as u8);
        if let Some(before_ms) = before_ms {
            builder = builder.before(MessageId::new(snowflake_from_ms(before_ms)));
        }
        if let Some(after_ms) = after_ms {
            builder = builder.after(MessageId::new(snowflake_from_ms(after_ms)));
        }

        let messages = channel_id.messages(http.as_ref(), builder).await.map_err(to_platform_error)?;
        Ok(messages.iter().map(|m| to_raw_message_no_ctx(conversation_id, m)).collect())
    }

    async fn download_attachment(&self, attachment_ref: &RawAttachmentRef) -> Result<Vec<u8>> {
        let response = reqwest::get(&attachment_ref.download_ref)
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))?;
        let bytes = response.bytes().await.map_err(|e| PlatformError::Transient(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn upload_attachment(&self, conversation_id: &str, name: &str, bytes: &[u8]) -> Result<String> {
        let http = self.http()?;
        let channel_id = Self::channel_id(conversation_id)?;

        let builder = CreateMessage::new().add_file(CreateAttachment::bytes(bytes.to_vec(), name.to_string()));
        let sent = channel_id.send_message(http.as_ref(), builder).await.map_err(to_platform_error)?;

        sent.attachments
            .first()
            .map(|a| a.url.clone())
            .ok_or_else(|| PlatformError::Permanent("discord accepted upload but returned no attachment".to_string()))
    }
}
