use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use relay_cache::{AttachmentCache, ConversationInfo, ConversationType, MessageCache, UserCache, UserInfo};
use relay_core::{AttachmentId, ConversationId, MessageId, Origin, PlatformConversationId};
use relay_platform::RawMessage;
use tokio::sync::Mutex as AsyncMutex;

use crate::capability::{MessageBuilder, ThreadHandler};
use crate::delta::ConversationDelta;

/// Number of lock stripes guarding conversation mutation. Fixed rather than
/// scaled to conversation count — this bounds worst-case contention without
/// needing a resizable striped map.
const STRIPE_COUNT: usize = 64;

/// The authoritative mutator of conversations, threads, and (by delegation)
/// messages. All writes to the four caches happen under a single striped
/// lock keyed by conversation id; every other component only reads.
pub struct ConversationManager {
    conversations: DashMap<ConversationId, ConversationInfo>,
    platform_index: DashMap<PlatformConversationId, ConversationId>,
    stripes: Vec<AsyncMutex<()>>,
    messages: Arc<MessageCache>,
    users: Arc<UserCache>,
    attachments: Arc<AttachmentCache>,
    thread_handler: Box<dyn ThreadHandler>,
    message_builder: Box<dyn MessageBuilder>,
}

impl ConversationManager {
    pub fn new(
        messages: Arc<MessageCache>,
        users: Arc<UserCache>,
        attachments: Arc<AttachmentCache>,
        thread_handler: Box<dyn ThreadHandler>,
        message_builder: Box<dyn MessageBuilder>,
    ) -> Self {
        let mut stripes = Vec::with_capacity(STRIPE_COUNT);
        for _ in 0..STRIPE_COUNT {
            stripes.push(AsyncMutex::new(()));
        }
        Self {
            conversations: DashMap::new(),
            platform_index: DashMap::new(),
            stripes,
            messages,
            users,
            attachments,
            thread_handler,
            message_builder,
        }
    }

    fn stripe_for(&self, conversation_id: &ConversationId) -> &AsyncMutex<()> {
        let mut hasher = DefaultHasher::new();
        conversation_id.as_str().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<ConversationInfo> {
        self.conversations.get(conversation_id).map(|e| e.clone())
    }

    pub fn resolve_platform_id(&self, platform_conversation_id: &str) -> Option<ConversationId> {
        self.platform_index
            .get(&PlatformConversationId::from(platform_conversation_id))
            .map(|e| e.clone())
    }

    /// Order of operations mirrors the manager's contract exactly: resolve
    /// or create the conversation, resolve the thread, build the message,
    /// record already-resolved attachment ids, insert into the message
    /// cache, update conversation bookkeeping, then synthesize the delta.
    ///
    /// Attachment download/size-gating happens upstream (in the incoming
    /// processor, via the downloader) — this method only records the ids
    /// the caller has already resolved.
    pub async fn add_to_conversation(
        &self,
        raw: RawMessage,
        conversation_type: ConversationType,
        resolved_attachments: Vec<AttachmentId>,
        origin: Origin,
    ) -> ConversationDelta {
        // Re-delivery of an already-cached message id with unchanged text and
        // attachments is a no-op: the platform replayed an event we've
        // already applied, not a genuine edit.
        let message_id = MessageId::from(raw.platform_message_id.clone());
        if let Some(existing) = self.messages.get(&message_id) {
            if existing.text == raw.text && existing.attachments == resolved_attachments {
                return ConversationDelta::empty();
            }
        }

        let platform_conv_id = PlatformConversationId::from(raw.platform_conversation_id.clone());
        let conv_id = self
            .platform_index
            .entry(platform_conv_id.clone())
            .or_insert_with(ConversationId::new)
            .clone();

        let _guard = self.stripe_for(&conv_id).lock().await;

        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conv_id.clone());

        let mut created = false;
        let mut entry = self.conversations.entry(conv_id.clone()).or_insert_with(|| {
            created = true;
            ConversationInfo::new(conv_id.clone(), platform_conv_id, conversation_type)
        });

        if created {
            delta.conversation_started = true;
            delta.fetch_history_needed = true;
        }

        let thread_id = self.thread_handler.resolve_thread(&mut entry, &raw);

        let mut msg = self.message_builder.build(&raw, conv_id.clone(), thread_id, origin);
        msg.attachments = resolved_attachments.clone();

        entry.last_activity = Utc::now();
        entry.known_members.insert(msg.sender.user_id.clone());
        for a in &resolved_attachments {
            entry.attachments.insert(a.clone());
        }
        drop(entry);

        self.users.upsert(UserInfo {
            user_id: msg.sender.user_id.clone(),
            display_name: msg.sender.display_name.clone(),
            username: None,
            is_bot: false,
            last_seen: Utc::now(),
        });
        delta.users_to_upsert.push(UserInfo {
            user_id: msg.sender.user_id.clone(),
            display_name: msg.sender.display_name.clone(),
            username: None,
            is_bot: false,
            last_seen: Utc::now(),
        });

        self.messages.insert(msg.clone());
        delta.added_messages.push(msg);

        delta
    }

    /// Diffs an updated raw message against the cached copy and synthesizes
    /// distinct edit/pin deltas. Platforms whose "edit" notification can
    /// also carry a reaction change emit that through its own raw event
    /// variant instead — this method covers text, attachment ids (on
    /// platforms that allow attachments on edit), and pin state, any subset
    /// of which may have changed in the same notification.
    pub async fn update_conversation(
        &self,
        conversation_id: &ConversationId,
        raw: &RawMessage,
        resolved_attachments: Vec<AttachmentId>,
    ) -> ConversationDelta {
        let _guard = self.stripe_for(conversation_id).lock().await;
        let message_id = MessageId::from(raw.platform_message_id.clone());

        let Some(existing) = self.messages.get(&message_id) else {
            return ConversationDelta::empty();
        };

        let text_changed = existing.text != raw.text;
        let attachments_changed = existing.attachments != resolved_attachments;
        let pin_changed = existing.is_pinned != raw.is_pinned;
        if !text_changed && !attachments_changed && !pin_changed {
            return ConversationDelta::empty();
        }

        let new_text = raw.text.clone();
        let new_pinned = raw.is_pinned;
        self.messages.update(&message_id, |m| {
            m.text = new_text.clone();
            if attachments_changed {
                m.attachments = resolved_attachments.clone();
            }
            if pin_changed {
                m.is_pinned = new_pinned;
            }
        });

        if pin_changed {
            if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
                if new_pinned {
                    conv.pinned_ids.insert(message_id.clone());
                } else {
                    conv.pinned_ids.remove(&message_id);
                }
            }
        }

        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conversation_id.clone());
        if text_changed {
            delta.edited_messages.push((message_id.clone(), raw.text.clone()));
        }
        if pin_changed {
            if new_pinned {
                delta.pins.push(message_id);
            } else {
                delta.unpins.push(message_id);
            }
        }
        delta
    }

    /// Never fails if the message is unknown — returns an empty delta.
    pub async fn delete_from_conversation(&self, conversation_id: &ConversationId, message_id: &MessageId) -> ConversationDelta {
        let _guard = self.stripe_for(conversation_id).lock().await;

        let removed = self.messages.delete(message_id);
        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conversation_id.clone());

        if let Some(msg) = removed {
            if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
                conv.pinned_ids.remove(message_id);
                if let Some(thread_id) = &msg.thread_id {
                    if let Some(thread) = conv.threads.get_mut(thread_id) {
                        thread.member_message_ids.retain(|m| m != message_id);
                        if thread.is_empty() {
                            conv.threads.remove(thread_id);
                        }
                    }
                }
            }
            delta.deleted_messages.push(message_id.clone());
        }

        delta
    }

    pub async fn add_reaction(&self, conversation_id: &ConversationId, message_id: &MessageId, user_id: relay_core::UserId, emoji: String) -> ConversationDelta {
        let _guard = self.stripe_for(conversation_id).lock().await;
        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conversation_id.clone());

        let inserted = self.messages.update(message_id, |m| {
            m.reactions.entry(emoji.clone()).or_default().insert(user_id.clone());
        });
        if inserted {
            delta.added_reactions.push((message_id.clone(), user_id, emoji));
        }
        delta
    }

    pub async fn remove_reaction(&self, conversation_id: &ConversationId, message_id: &MessageId, user_id: relay_core::UserId, emoji: String) -> ConversationDelta {
        let _guard = self.stripe_for(conversation_id).lock().await;
        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conversation_id.clone());

        let updated = self.messages.update(message_id, |m| {
            if let Some(users) = m.reactions.get_mut(&emoji) {
                users.remove(&user_id);
            }
        });
        if updated {
            delta.removed_reactions.push((message_id.clone(), user_id, emoji));
        }
        delta
    }

    pub async fn pin_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> ConversationDelta {
        let _guard = self.stripe_for(conversation_id).lock().await;
        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conversation_id.clone());

        self.messages.update(message_id, |m| m.is_pinned = true);
        if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
            conv.pinned_ids.insert(message_id.clone());
        }
        delta.pins.push(message_id.clone());
        delta
    }

    pub async fn unpin_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> ConversationDelta {
        let _guard = self.stripe_for(conversation_id).lock().await;
        let mut delta = ConversationDelta::empty();
        delta.conversation_id = Some(conversation_id.clone());

        self.messages.update(message_id, |m| m.is_pinned = false);
        if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
            conv.pinned_ids.remove(message_id);
        }
        delta.unpins.push(message_id.clone());
        delta
    }

    /// Flips `just_started` false — called exactly once by the incoming
    /// processor immediately after emitting `conversation_started`.
    pub fn clear_just_started(&self, conversation_id: &ConversationId) {
        if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
            conv.just_started = false;
        }
    }

    /// Build a `CachedMessage` from platform history without inserting it —
    /// used by the history fetcher to hand back a uniform shape whether the
    /// page came from cache or from a fresh platform call.
    pub fn build_history_message(&self, conversation_id: &ConversationId, raw: &RawMessage) -> relay_cache::CachedMessage {
        self.message_builder.build(raw, conversation_id.clone(), None, Origin::Platform)
    }

    /// Populate the message cache with a fetched history page, when
    /// `cache_fetched_history` is enabled. Bypasses delta synthesis —
    /// backfilled history never re-triggers `conversation_started`.
    pub async fn cache_history(&self, conversation_id: &ConversationId, messages: &[relay_cache::CachedMessage]) {
        let _guard = self.stripe_for(conversation_id).lock().await;
        for m in messages {
            self.messages.insert(m.clone());
        }
    }

    pub fn attachments(&self) -> &Arc<AttachmentCache> {
        &self.attachments
    }

    pub fn messages(&self) -> &Arc<MessageCache> {
        &self.messages
    }

    pub fn users(&self) -> &Arc<UserCache> {
        &self.users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DefaultThreadHandler;
    use relay_cache::Mention;

    struct PassthroughBuilder;
    impl MessageBuilder for PassthroughBuilder {
        fn normalize_mentions(&self, _raw: &RawMessage) -> Vec<Mention> {
            Vec::new()
        }
    }

    fn manager() -> ConversationManager {
        let messages = Arc::new(MessageCache::new(1000, 1000, 72));
        let users = Arc::new(UserCache::new(256, 72));
        let attachments = Arc::new(AttachmentCache::new(std::env::temp_dir(), 100, 72));
        ConversationManager::new(messages, users, attachments, Box::new(DefaultThreadHandler), Box::new(PassthroughBuilder))
    }

    fn raw(conv: &str, msg: &str, text: &str) -> RawMessage {
        RawMessage {
            platform_message_id: msg.to_string(),
            platform_conversation_id: conv.to_string(),
            platform_thread_id: None,
            sender_id: "u1".to_string(),
            sender_display_name: "U1".to_string(),
            sender_is_bot: false,
            text: text.to_string(),
            raw_mentions: vec![],
            attachments: vec![],
            is_direct_message: false,
            is_pinned: false,
            timestamp_ms: 1,
        }
    }

    #[tokio::test]
    async fn first_message_starts_conversation() {
        let mgr = manager();
        let delta = mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        assert!(delta.conversation_started);
        assert!(delta.fetch_history_needed);
        assert_eq!(delta.added_messages.len(), 1);
    }

    #[tokio::test]
    async fn redelivering_identical_message_is_idempotent() {
        let mgr = manager();
        mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        let delta = mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        assert!(delta.is_empty());
    }

    #[tokio::test]
    async fn second_message_does_not_restart_conversation() {
        let mgr = manager();
        mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        let delta = mgr.add_to_conversation(raw("g/c", "m2", "again"), ConversationType::Channel, vec![], Origin::Platform).await;
        assert!(!delta.conversation_started);
    }

    #[tokio::test]
    async fn update_conversation_emits_edit_on_text_change() {
        let mgr = manager();
        let conv_delta = mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = conv_delta.conversation_id.unwrap();
        let delta = mgr.update_conversation(&conv_id, &raw("g/c", "m1", "hi edited"), vec![]).await;
        assert_eq!(delta.edited_messages.len(), 1);
        assert_eq!(delta.edited_messages[0].1, "hi edited");
    }

    #[tokio::test]
    async fn update_conversation_is_empty_when_text_unchanged() {
        let mgr = manager();
        let conv_delta = mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = conv_delta.conversation_id.unwrap();
        let delta = mgr.update_conversation(&conv_id, &raw("g/c", "m1", "hi"), vec![]).await;
        assert!(delta.is_empty());
    }

    #[tokio::test]
    async fn update_conversation_diffs_pin_state_into_pins_and_unpins() {
        let mgr = manager();
        let conv_delta = mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = conv_delta.conversation_id.unwrap();
        let mid = MessageId::from("m1");

        let mut pinned = raw("g/c", "m1", "hi");
        pinned.is_pinned = true;
        let delta = mgr.update_conversation(&conv_id, &pinned, vec![]).await;
        assert_eq!(delta.pins, vec![mid.clone()]);
        assert!(delta.edited_messages.is_empty());
        assert!(mgr.get(&conv_id).unwrap().pinned_ids.contains(&mid));

        let mut unpinned = raw("g/c", "m1", "hi");
        unpinned.is_pinned = false;
        let delta = mgr.update_conversation(&conv_id, &unpinned, vec![]).await;
        assert_eq!(delta.unpins, vec![mid.clone()]);
        assert!(!mgr.get(&conv_id).unwrap().pinned_ids.contains(&mid));
    }

    #[tokio::test]
    async fn delete_unknown_message_returns_empty_delta() {
        let mgr = manager();
        let conv_id = ConversationId::new();
        let delta = mgr.delete_from_conversation(&conv_id, &MessageId::from("ghost")).await;
        assert!(delta.is_empty());
    }

    #[tokio::test]
    async fn delete_known_message_removes_from_pins() {
        let mgr = manager();
        let conv_delta = mgr.add_to_conversation(raw("g/c", "m1", "hi"), ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = conv_delta.conversation_id.unwrap();
        let mid = MessageId::from("m1");
        mgr.pin_message(&conv_id, &mid).await;
        let delta = mgr.delete_from_conversation(&conv_id, &mid).await;
        assert_eq!(delta.deleted_messages.len(), 1);
        let conv = mgr.get(&conv_id).unwrap();
        assert!(!conv.pinned_ids.contains(&mid));
    }
}
