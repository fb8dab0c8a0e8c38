use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use relay_core::UserId;
use tracing::debug;

use crate::entities::{CacheStats, UserInfo};

/// Insertion-order eviction list paired with the map, so a full cache can
/// drop its oldest half in one pass instead of scanning every entry's
/// timestamp.
const EVICT_FRACTION: usize = 2;

pub struct UserCache {
    entries: DashMap<UserId, UserInfo>,
    order: Mutex<Vec<UserId>>,
    max_entries: usize,
    max_age_hours: i64,
    evicted_total: AtomicU64,
}

impl UserCache {
    pub fn new(max_entries: usize, max_age_hours: u64) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
            max_entries,
            max_age_hours: max_age_hours as i64,
            evicted_total: AtomicU64::new(0),
        }
    }

    /// Insert or refresh a user's `last_seen` timestamp. Called whenever a
    /// user is observed as a message sender or mention target. Moves the
    /// user to the back of `order` on every call, not just on first
    /// insertion, so eviction is true LRU rather than FIFO-by-first-seen.
    pub fn upsert(&self, user: UserInfo) {
        let id = user.user_id.clone();
        self.entries.insert(id.clone(), user);

        let mut order = self.order.lock().unwrap();
        order.retain(|existing| existing != &id);
        order.push(id);

        if self.entries.len() >= self.max_entries {
            let evict_count = self.max_entries / EVICT_FRACTION;
            let to_remove: Vec<_> = order.drain(..evict_count.min(order.len())).collect();
            drop(order);
            for key in &to_remove {
                self.entries.remove(key);
            }
            self.evicted_total.fetch_add(to_remove.len() as u64, Ordering::Relaxed);
            debug!(count = to_remove.len(), "user cache: evicted oldest half at capacity");
        }
    }

    pub fn get(&self, user_id: &UserId) -> Option<UserInfo> {
        self.entries.get(user_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            evicted_total: self.evicted_total.load(Ordering::Relaxed),
        }
    }

    /// Drop entries whose `last_seen` predates `max_age_hours`.
    fn sweep_expired(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(self.max_age_hours);
        let expired: Vec<UserId> = self
            .entries
            .iter()
            .filter(|e| e.value().last_seen < cutoff)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        if !expired.is_empty() {
            let mut order = self.order.lock().unwrap();
            order.retain(|k| !expired.contains(k));
            self.evicted_total.fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(count = expired.len(), "user cache: swept expired entries");
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

    fn user(id: &str) -> UserInfo {
        UserInfo {
            user_id: UserId::from(id),
            display_name: id.to_string(),
            username: None,
            is_bot: false,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let cache = UserCache::new(256, 72);
        cache.upsert(user("u1"));
        assert!(cache.get(&UserId::from("u1")).is_some());
    }

    #[test]
    fn evicts_oldest_half_at_capacity() {
        let cache = UserCache::new(10, 72);
        for i in 0..10 {
            cache.upsert(user(&format!("u{i}")));
        }
        assert!(cache.len() <= 10);
        // one more insert should trigger the evict-at-capacity branch
        cache.upsert(user("u10"));
        assert!(cache.len() < 11);
    }

    #[test]
    fn reupserting_protects_from_eviction() {
        let cache = UserCache::new(10, 72);
        for i in 0..10 {
            cache.upsert(user(&format!("u{i}")));
        }
        // touch u0 again so it moves to the back of the eviction order
        cache.upsert(user("u0"));
        cache.upsert(user("u10"));

        assert!(cache.get(&UserId::from("u0")).is_some());
    }

    #[test]
    fn sweep_removes_stale_entries() {
        let cache = UserCache::new(256, 1);
        let mut u = user("old");
        u.last_seen = Utc::now() - chrono::Duration::hours(5);
        cache.upsert(u);
        cache.upsert(user("fresh"));
        cache.sweep_expired();
        assert!(cache.get(&UserId::from("old")).is_none());
        assert!(cache.get(&UserId::from("fresh")).is_some());
    }
}
