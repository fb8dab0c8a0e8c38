use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_core::ConversationId;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bucket::{take_token, TokenBucket};

/// The call-site class a rate-limited operation belongs to. Only
/// `Send`/`Edit` consult the message-class bucket; every operation
/// consults the global and per-conversation buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Send,
    Edit,
    Delete,
    Reaction,
    Pin,
    FetchHistory,
    FetchAttachment,
}

impl Operation {
    fn is_message_class(&self) -> bool {
        matches!(self, Operation::Send | Operation::Edit)
    }
}

/// Process-singleton rate limiter. Three independent buckets: one global,
/// one per conversation (created lazily), one shared message-class bucket
/// consulted only for `send`/`edit`.
///
/// `limit_request` never fails. It blocks the calling task until every
/// applicable bucket has a free token, in a fixed acquisition order
/// (message-class, then per-conversation, then global) so that concurrent
/// callers never deadlock against each other.
pub struct RateLimiter {
    global: Arc<Mutex<TokenBucket>>,
    message: Arc<Mutex<TokenBucket>>,
    per_conversation: DashMap<ConversationId, Arc<Mutex<TokenBucket>>>,
    per_conversation_rpm: u32,
}

impl RateLimiter {
    pub fn new(global_rpm: u32, per_conversation_rpm: u32, message_rpm: u32) -> Self {
        Self {
            global: Arc::new(Mutex::new(TokenBucket::new(global_rpm))),
            message: Arc::new(Mutex::new(TokenBucket::new(message_rpm))),
            per_conversation: DashMap::new(),
            per_conversation_rpm,
        }
    }

    fn conversation_bucket(&self, conversation_id: &ConversationId) -> Arc<Mutex<TokenBucket>> {
        self.per_conversation
            .entry(conversation_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.per_conversation_rpm))))
            .clone()
    }

    /// Block until all applicable buckets have a free token, then consume
    /// one from each. Cancellation-safe: dropping the future before it
    /// resolves consumes nothing.
    pub async fn limit_request(&self, operation: Operation, conversation_id: Option<&ConversationId>) {
        if operation.is_message_class() {
            let mut bucket = self.message.lock().await;
            take_token(&mut bucket).await;
        }

        if let Some(conv_id) = conversation_id {
            let bucket = self.conversation_bucket(conv_id);
            let mut bucket = bucket.lock().await;
            take_token(&mut bucket).await;
        }

        let mut global = self.global.lock().await;
        take_token(&mut global).await;
    }

    /// Background sweep: drops per-conversation buckets that are at full
    /// capacity (i.e. have been idle since the last sweep), bounding the
    /// map's size under sustained churn across many conversations.
    pub async fn sweep_idle_buckets(&self) {
        let mut idle = Vec::new();
        for entry in self.per_conversation.iter() {
            let mut bucket = entry.value().lock().await;
            if bucket.is_idle() {
                idle.push(entry.key().clone());
            }
        }
        for key in &idle {
            self.per_conversation.remove(key);
        }
        if !idle.is_empty() {
            debug!(count = idle.len(), "rate limiter: swept idle conversation buckets");
        }
    }

    /// Spawn the periodic idle-bucket sweep. Returns a handle the adapter
    /// aborts on shutdown.
    pub fn start_maintenance(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                limiter.sweep_idle_buckets().await;
            }
        })
    }

    pub fn conversation_bucket_count(&self) -> usize {
        self.per_conversation.len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_conversation_rpm", &self.per_conversation_rpm)
            .field("conversation_buckets", &self.per_conversation.len())
            .finish()
    }
}

pub fn log_startup(global_rpm: u32, per_conversation_rpm: u32, message_rpm: u32) {
    info!(global_rpm, per_conversation_rpm, message_rpm, "rate limiter initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limit_request_never_fails_under_capacity() {
        let limiter = RateLimiter::new(60, 60, 60);
        let conv = ConversationId::new();
        for _ in 0..5 {
            limiter.limit_request(Operation::Send, Some(&conv)).await;
        }
    }

    #[tokio::test]
    async fn cancellation_consumes_no_token() {
        let limiter = Arc::new(RateLimiter::new(1, 60, 60));
        let conv = ConversationId::new();
        // Drain the global bucket.
        limiter.limit_request(Operation::FetchHistory, Some(&conv)).await;

        let limiter2 = Arc::clone(&limiter);
        let conv2 = conv.clone();
        let fut = limiter2.limit_request(Operation::FetchHistory, Some(&conv2));
        drop(fut); // cancel before polling to completion

        // A non-message-class op still needs the global bucket; capacity
        // should be unaffected by the dropped future above.
        let bucket_count_before = limiter.conversation_bucket_count();
        assert!(bucket_count_before >= 1);
    }

    #[tokio::test]
    async fn sweep_removes_idle_buckets() {
        let limiter = RateLimiter::new(60, 60, 60);
        let conv = ConversationId::new();
        limiter.limit_request(Operation::FetchHistory, Some(&conv)).await;
        // Bucket refills instantly given default rpm > request count, so it is idle.
        limiter.sweep_idle_buckets().await;
        assert_eq!(limiter.conversation_bucket_count(), 0);
    }
}
