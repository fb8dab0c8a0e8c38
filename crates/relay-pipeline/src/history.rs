use relay_cache::CachedMessage;
use relay_conversations::ConversationManager;
use relay_core::ConversationId;
use relay_platform::PlatformClient;
use relay_ratelimit::{Operation, RateLimiter};
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Two-tier history resolution: serve from `MessageCache` when the
/// requested window is already fully covered, otherwise page through
/// `PlatformClient::fetch_history` up to `max_pagination_iterations` pages.
pub struct HistoryFetcher {
    rate_limiter: Arc<RateLimiter>,
    max_pagination_iterations: u32,
    cache_fetched_history: bool,
}

impl HistoryFetcher {
    pub fn new(rate_limiter: Arc<RateLimiter>, max_pagination_iterations: u32, cache_fetched_history: bool) -> Self {
        Self {
            rate_limiter,
            max_pagination_iterations,
            cache_fetched_history,
        }
    }

    /// Requires `before_ms` or `after_ms` — a window with neither bound is
    /// rejected rather than guessed at.
    pub async fn fetch(
        &self,
        manager: &ConversationManager,
        client: &dyn PlatformClient,
        conversation_id: &ConversationId,
        platform_conversation_id: &str,
        limit: usize,
        before_ms: Option<i64>,
        after_ms: Option<i64>,
    ) -> Result<Vec<CachedMessage>> {
        if before_ms.is_none() && after_ms.is_none() {
            return Err(PipelineError::Validation("fetch_history requires before or after".to_string()));
        }

        if let Some(cached) = manager.messages().covers_window(conversation_id, limit, before_ms, after_ms) {
            return Ok(cached);
        }

        self.rate_limiter.limit_request(Operation::FetchHistory, Some(conversation_id)).await;

        let mut collected: Vec<CachedMessage> = Vec::new();
        let mut cursor_before = before_ms;
        let mut cursor_after = after_ms;

        for _ in 0..self.max_pagination_iterations {
            if collected.len() >= limit {
                break;
            }
            let requested = limit - collected.len();
            let page = client.fetch_history(platform_conversation_id, requested, cursor_before, cursor_after).await?;
            if page.is_empty() {
                break;
            }

            let oldest_ts = page.iter().map(|m| m.timestamp_ms).min();
            let newest_ts = page.iter().map(|m| m.timestamp_ms).max();
            let page_len = page.len();

            for raw in &page {
                collected.push(manager.build_history_message(conversation_id, raw));
            }

            if cursor_before.is_some() {
                cursor_before = oldest_ts;
            } else {
                cursor_after = newest_ts;
            }

            if page_len < requested {
                break; // platform has no more messages in this direction
            }
        }

        collected.truncate(limit);

        if self.cache_fetched_history {
            manager.cache_history(conversation_id, &collected).await;
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_conversations::{ConversationManager, DefaultThreadHandler};
    use relay_cache::{AttachmentCache, ConversationType, Mention, MessageCache, UserCache};
    use relay_core::Origin;
    use relay_platform::test_support::FakeClient;
    use relay_platform::RawMessage;

    struct PassthroughBuilder;
    impl relay_conversations::MessageBuilder for PassthroughBuilder {
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

    #[tokio::test]
    async fn rejects_window_with_no_bound() {
        let mgr = manager();
        let fetcher = HistoryFetcher::new(Arc::new(RateLimiter::new(1000, 1000, 1000)), 10, true);
        let client = FakeClient::new();
        let conv_id = ConversationId::new();
        let result = fetcher.fetch(&mgr, &client, &conv_id, "g/c", 10, None, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serves_from_cache_when_window_covered() {
        let mgr = manager();
        let raw = RawMessage {
            platform_message_id: "m1".to_string(),
            platform_conversation_id: "g/c".to_string(),
            platform_thread_id: None,
            sender_id: "u1".to_string(),
            sender_display_name: "U1".to_string(),
            sender_is_bot: false,
            text: "hi".to_string(),
            raw_mentions: vec![],
            attachments: vec![],
            is_direct_message: false,
            is_pinned: false,
            timestamp_ms: 10,
        };
        let delta = mgr.add_to_conversation(raw, ConversationType::Channel, vec![], Origin::Platform).await;
        let conv_id = delta.conversation_id.unwrap();

        let fetcher = HistoryFetcher::new(Arc::new(RateLimiter::new(1000, 1000, 1000)), 10, true);
        let client = FakeClient::new();
        let history = fetcher.fetch(&mgr, &client, &conv_id, "g/c", 1, Some(100), None).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
