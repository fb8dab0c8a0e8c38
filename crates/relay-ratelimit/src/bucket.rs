use tokio::time::{Duration, Instant};

/// A leaky-bucket token counter. Tokens refill continuously based on
/// elapsed wall-clock time rather than a fixed tick, so a bucket that sat
/// idle for an hour is simply full the next time it's touched.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rpm: u32) -> Self {
        let refill_per_sec = rpm as f64 / 60.0;
        Self {
            capacity: rpm.max(1) as f64,
            tokens: rpm.max(1) as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// How long the caller must wait for one free token, given the bucket's
    /// state right now. Returns `Duration::ZERO` if a token is already
    /// available.
    fn wait_for_token(&mut self) -> Duration {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }

    fn consume(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    /// True when the bucket is at full capacity — used by the idle-bucket
    /// sweep to decide whether a per-conversation bucket can be dropped.
    pub fn is_idle(&mut self) -> bool {
        self.refill(Instant::now());
        self.tokens >= self.capacity
    }
}

/// Block the calling task until `bucket` has a free token, then consume it.
/// Cancellation-safe: if the caller is dropped during the sleep, no token is
/// consumed (the await point precedes `consume`).
pub async fn take_token(bucket: &mut TokenBucket) {
    loop {
        let wait = bucket.wait_for_token();
        if wait.is_zero() {
            bucket.consume();
            return;
        }
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_bucket_does_not_block() {
        let mut b = TokenBucket::new(60);
        let start = Instant::now();
        take_token(&mut b).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bucket_waits_for_refill() {
        let mut b = TokenBucket::new(60); // 1 token/sec
        for _ in 0..60 {
            take_token(&mut b).await;
        }
        // Bucket is now empty; next take should block ~1s.
        let start = Instant::now();
        let handle = tokio::spawn(async move {
            take_token(&mut b).await;
        });
        tokio::time::advance(Duration::from_secs(2)).await;
        handle.await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn is_idle_reports_full_capacity() {
        let mut b = TokenBucket::new(10);
        assert!(b.is_idle());
    }
}
