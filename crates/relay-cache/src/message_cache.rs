use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use relay_core::{ConversationId, MessageId};
use tracing::debug;

use crate::entities::{CacheStats, CachedMessage};

/// Keeps every cached message plus two insertion-order indexes (per
/// conversation, and global) so capacity eviction can drop the oldest
/// entries without scanning every message's timestamp, enforcing a
/// two-level cap (global total, per-conversation total).
pub struct MessageCache {
    messages: DashMap<MessageId, CachedMessage>,
    conversation_order: DashMap<ConversationId, VecDeque<MessageId>>,
    global_order: Mutex<VecDeque<MessageId>>,
    max_total: usize,
    max_per_conversation: usize,
    max_age_hours: i64,
    evicted_total: AtomicU64,
}

impl MessageCache {
    pub fn new(max_total: usize, max_per_conversation: usize, max_age_hours: u64) -> Self {
        Self {
            messages: DashMap::new(),
            conversation_order: DashMap::new(),
            global_order: Mutex::new(VecDeque::new()),
            max_total,
            max_per_conversation,
            max_age_hours: max_age_hours as i64,
            evicted_total: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, msg: CachedMessage) {
        let id = msg.message_id.clone();
        let conv = msg.conversation_id.clone();

        self.conversation_order.entry(conv.clone()).or_default().push_back(id.clone());
        self.global_order.lock().unwrap().push_back(id.clone());
        self.messages.insert(id, msg);

        self.enforce_per_conversation_cap(&conv);
        self.enforce_global_cap();
    }

    fn enforce_per_conversation_cap(&self, conv: &ConversationId) {
        let mut order = match self.conversation_order.get_mut(conv) {
            Some(o) => o,
            None => return,
        };
        while order.len() > self.max_per_conversation {
            if let Some(oldest) = order.pop_front() {
                self.messages.remove(&oldest);
                self.remove_from_global_order(&oldest);
                self.evicted_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn enforce_global_cap(&self) {
        loop {
            let too_many = {
                let order = self.global_order.lock().unwrap();
                order.len() > self.max_total
            };
            if !too_many {
                break;
            }
            let oldest = self.global_order.lock().unwrap().pop_front();
            if let Some(id) = oldest {
                if let Some((_, msg)) = self.messages.remove(&id) {
                    if let Some(mut o) = self.conversation_order.get_mut(&msg.conversation_id) {
                        o.retain(|m| m != &id);
                    }
                    self.evicted_total.fetch_add(1, Ordering::Relaxed);
                }
            } else {
                break;
            }
        }
    }

    fn remove_from_global_order(&self, id: &MessageId) {
        let mut order = self.global_order.lock().unwrap();
        order.retain(|m| m != id);
    }

    pub fn get(&self, id: &MessageId) -> Option<CachedMessage> {
        self.messages.get(id).map(|e| e.clone())
    }

    pub fn update<F: FnOnce(&mut CachedMessage)>(&self, id: &MessageId, f: F) -> bool {
        if let Some(mut entry) = self.messages.get_mut(id) {
            f(entry.value_mut());
            true
        } else {
            false
        }
    }

    /// Returns `true` if a message existed and was removed.
    pub fn delete(&self, id: &MessageId) -> Option<CachedMessage> {
        let removed = self.messages.remove(id).map(|(_, m)| m);
        if let Some(msg) = &removed {
            self.remove_from_global_order(id);
            if let Some(mut o) = self.conversation_order.get_mut(&msg.conversation_id) {
                o.retain(|m| m != id);
            }
        }
        removed
    }

    /// Messages for a conversation, oldest-first, most recent `limit`.
    pub fn recent(&self, conv: &ConversationId, limit: usize) -> Vec<CachedMessage> {
        let order = match self.conversation_order.get(conv) {
            Some(o) => o.clone(),
            None => return Vec::new(),
        };
        order
            .iter()
            .rev()
            .take(limit)
            .rev()
            .filter_map(|id| self.messages.get(id).map(|e| e.clone()))
            .collect()
    }

    /// Whether the cache already holds every message in `conv` needed to
    /// answer a `before`/`after` window of size `limit`, so the
    /// `HistoryFetcher` can skip the platform call entirely. Walks the
    /// conversation order newest-first so the window taken is the `limit`
    /// messages closest to the cutoff, not the oldest ones in the
    /// conversation; the result is handed back oldest-first to match
    /// `recent()`'s convention.
    pub fn covers_window(&self, conv: &ConversationId, limit: usize, before_ms: Option<i64>, after_ms: Option<i64>) -> Option<Vec<CachedMessage>> {
        let order = self.conversation_order.get(conv)?;
        let mut msgs: Vec<CachedMessage> = order
            .iter()
            .rev()
            .filter_map(|id| self.messages.get(id).map(|e| e.clone()))
            .filter(|m| before_ms.map_or(true, |before| m.timestamp_ms < before))
            .filter(|m| after_ms.map_or(true, |after| m.timestamp_ms > after))
            .take(limit)
            .collect();

        if msgs.len() < limit {
            // Can't be sure the cache has the full window; let the caller
            // fall back to the platform client.
            return None;
        }
        msgs.reverse();
        Some(msgs)
    }

    pub fn total_len(&self) -> usize {
        self.messages.len()
    }

    pub fn conversation_len(&self, conv: &ConversationId) -> usize {
        self.conversation_order.get(conv).map(|o| o.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.messages.len(),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    fn sweep_expired(&self) {
        let cutoff_ms = (Utc::now() - chrono::Duration::hours(self.max_age_hours)).timestamp_millis();
        let expired: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|e| e.value().timestamp_ms < cutoff_ms)
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.delete(id);
        }
        if !expired.is_empty() {
            self.evicted_total.fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(count = expired.len(), "message cache: swept expired entries");
        }
    }

    pub fn start_maintenance(self: &std::sync::Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        let cache = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MessageSender;
    use relay_core::{Origin, UserId};
    use std::collections::HashMap;

    fn msg(conv: &ConversationId, id: &str, ts: i64) -> CachedMessage {
        CachedMessage {
            message_id: MessageId::from(id),
            conversation_id: conv.clone(),
            thread_id: None,
            sender: MessageSender { user_id: UserId::from("u1"), display_name: "U1".into() },
            text: "hi".into(),
            mentions: vec![],
            attachments: vec![],
            reactions: HashMap::new(),
            is_direct_message: false,
            is_pinned: false,
            timestamp_ms: ts,
            origin: Origin::Platform,
        }
    }

    #[test]
    fn per_conversation_cap_evicts_oldest() {
        let cache = MessageCache::new(1000, 3, 72);
        let conv = ConversationId::new();
        for i in 0..5 {
            cache.insert(msg(&conv, &format!("m{i}"), i as i64));
        }
        assert_eq!(cache.conversation_len(&conv), 3);
        assert!(cache.get(&MessageId::from("m0")).is_none());
        assert!(cache.get(&MessageId::from("m4")).is_some());
    }

    #[test]
    fn global_cap_evicts_oldest_across_conversations() {
        let cache = MessageCache::new(3, 1000, 72);
        let conv_a = ConversationId::new();
        let conv_b = ConversationId::new();
        cache.insert(msg(&conv_a, "a1", 1));
        cache.insert(msg(&conv_b, "b1", 2));
        cache.insert(msg(&conv_a, "a2", 3));
        cache.insert(msg(&conv_b, "b2", 4));
        assert_eq!(cache.total_len(), 3);
        assert!(cache.get(&MessageId::from("a1")).is_none());
    }

    #[test]
    fn covers_window_returns_none_when_insufficient() {
        let cache = MessageCache::new(1000, 1000, 72);
        let conv = ConversationId::new();
        cache.insert(msg(&conv, "m1", 10));
        assert!(cache.covers_window(&conv, 5, Some(100), None).is_none());
    }

    #[test]
    fn covers_window_returns_messages_when_sufficient() {
        let cache = MessageCache::new(1000, 1000, 72);
        let conv = ConversationId::new();
        for i in 0..5 {
            cache.insert(msg(&conv, &format!("m{i}"), i as i64));
        }
        let result = cache.covers_window(&conv, 3, Some(100), None).unwrap();
        let ids: Vec<String> = result.iter().map(|m| m.message_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn delete_removes_from_all_indexes() {
        let cache = MessageCache::new(1000, 1000, 72);
        let conv = ConversationId::new();
        cache.insert(msg(&conv, "m1", 1));
        let removed = cache.delete(&MessageId::from("m1"));
        assert!(removed.is_some());
        assert_eq!(cache.total_len(), 0);
        assert_eq!(cache.conversation_len(&conv), 0);
    }
}
