//! External-call budget: requests/minute and tokens/minute token buckets,
//! plus the retry schedule used after a rate-limit signal.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::Rng;
use tracing::debug;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Longest single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n.max(1)).unwrap_or(NonZeroU32::MIN)
}

/// Token-bucket waiter shared by every call in a batch.
#[derive(Clone)]
pub struct CallBudget {
    requests: Arc<DirectLimiter>,
    tokens: Arc<DirectLimiter>,
    token_burst: u32,
    max_retries: u32,
    backoff_base: Duration,
}

impl CallBudget {
    pub fn new(
        requests_per_minute: u32,
        tokens_per_minute: u32,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        let token_burst = tokens_per_minute.max(1);
        CallBudget {
            requests: Arc::new(RateLimiter::direct(Quota::per_minute(non_zero(
                requests_per_minute,
            )))),
            tokens: Arc::new(RateLimiter::direct(Quota::per_minute(non_zero(token_burst)))),
            token_burst,
            max_retries,
            backoff_base,
        }
    }

    /// Suspend until one request carrying `tokens` fits the budget.
    pub async fn acquire(&self, tokens: u32) {
        self.requests.until_ready().await;
        // A single call larger than the bucket only has to wait for a full one.
        let n = non_zero(tokens.min(self.token_burst));
        if self.tokens.until_n_ready(n).await.is_err() {
            debug!("Token request of {} exceeds bucket capacity", tokens);
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (0-based): `base · 2^attempt`
    /// plus up to 25% jitter, capped at 30s. A provider-supplied
    /// `Retry-After` wins when it is longer.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(MAX_BACKOFF);
        let jitter_ms = (exp.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms));
        let delay = (exp + jitter).min(MAX_BACKOFF);
        match retry_after {
            Some(ra) if ra > delay => ra.min(MAX_BACKOFF),
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_backoff_grows_exponentially() {
        let budget = CallBudget::new(60, 1000, 3, Duration::from_millis(100));
        let d0 = budget.backoff(0, None);
        let d2 = budget.backoff(2, None);
        assert!(d0 >= Duration::from_millis(100) && d0 < Duration::from_millis(125));
        assert!(d2 >= Duration::from_millis(400) && d2 < Duration::from_millis(500));
        assert_eq!(budget.backoff(30, None), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_after_wins_when_longer() {
        let budget = CallBudget::new(60, 1000, 3, Duration::from_millis(100));
        assert_eq!(
            budget.backoff(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert!(budget.backoff(0, Some(Duration::from_millis(1))) >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_acquire_within_burst_does_not_wait() {
        let budget = CallBudget::new(10, 1000, 3, Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..5 {
            budget.acquire(100).await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_oversized_request_is_clamped_to_bucket() {
        let budget = CallBudget::new(10, 50, 3, Duration::from_millis(10));
        let start = Instant::now();
        budget.acquire(5_000).await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
