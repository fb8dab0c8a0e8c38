use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::{AttachmentId, ConversationId, MessageId, Origin, PlatformConversationId, ThreadId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Dm,
    Group,
    Channel,
}

/// Authoritative in-memory record of a platform-defined chat context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub conversation_id: ConversationId,
    pub platform_conversation_id: PlatformConversationId,
    pub conversation_type: ConversationType,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub known_members: HashSet<UserId>,
    /// True from creation until the `conversation_started` event for this
    /// conversation has been emitted; flips false exactly once.
    pub just_started: bool,
    pub threads: HashMap<ThreadId, ThreadInfo>,
    pub attachments: HashSet<AttachmentId>,
    pub pinned_ids: BTreeSet<MessageId>,
}

impl ConversationInfo {
    pub fn new(conversation_id: ConversationId, platform_conversation_id: PlatformConversationId, conversation_type: ConversationType) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            platform_conversation_id,
            conversation_type,
            conversation_name: None,
            server_id: None,
            server_name: None,
            created_at: now,
            last_activity: now,
            known_members: HashSet::new(),
            just_started: true,
            threads: HashMap::new(),
            attachments: HashSet::new(),
            pinned_ids: BTreeSet::new(),
        }
    }
}

/// A reply grouping inside a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    pub root_message_id: MessageId,
    pub member_message_ids: Vec<MessageId>,
    pub is_pinned: bool,
}

impl ThreadInfo {
    pub fn new(thread_id: ThreadId, root_message_id: MessageId) -> Self {
        Self {
            thread_id,
            root_message_id: root_message_id.clone(),
            member_message_ids: vec![root_message_id],
            is_pinned: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.member_message_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSender {
    pub user_id: UserId,
    pub display_name: String,
}

/// A reference to who a message is addressed to: either specific users or
/// the platform's "mention everyone" sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Mention {
    User(UserId),
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub thread_id: Option<ThreadId>,
    pub sender: MessageSender,
    pub text: String,
    pub mentions: Vec<Mention>,
    pub attachments: Vec<AttachmentId>,
    /// emoji (unicode) -> user ids who reacted with it
    pub reactions: HashMap<String, HashSet<UserId>>,
    pub is_direct_message: bool,
    pub is_pinned: bool,
    pub timestamp_ms: i64,
    pub origin: Origin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub display_name: String,
    pub username: Option<String>,
    pub is_bot: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl AttachmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentType::Image => "image",
            AttachmentType::Video => "video",
            AttachmentType::Audio => "audio",
            AttachmentType::Document => "document",
            AttachmentType::Sticker => "sticker",
        }
    }

    /// Classify by file extension using a coarse, platform-agnostic mapping.
    pub fn classify(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" => AttachmentType::Image,
            "mp4" | "mov" | "webm" | "mkv" => AttachmentType::Video,
            "mp3" | "wav" | "ogg" | "m4a" => AttachmentType::Audio,
            "webp_sticker" | "tgs" => AttachmentType::Sticker,
            _ => AttachmentType::Document,
        }
    }
}

/// Operational counters exposed by each cache's `stats()` method — not part
/// of the wire protocol, just visibility into maintenance behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub evicted_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAttachment {
    pub attachment_id: AttachmentId,
    pub attachment_type: AttachmentType,
    pub file_extension: String,
    pub size_bytes: u64,
    /// Whether the attachment was small enough to be downloaded and is
    /// addressable via `fetch_attachment`.
    pub processable: bool,
    pub local_path: Option<String>,
    pub created_at: DateTime<Utc>,
}
