//! Token-bucket rate limiting, grounded on the teacher's
//! `MarketDataProvider::rate_limit()` shape (`RateLimit{requests_per_minute,
//! max_concurrency, min_delay}`), generalized into an actual limiter since
//! here the rate limit is enforced by us rather than advertised to a caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub max_concurrency: usize,
    pub min_delay: Duration,
}

impl RateLimit {
    /// Source-A: 5 requests/second/base (§4.2).
    pub fn airtable() -> Self {
        Self {
            requests_per_minute: 300,
            max_concurrency: 4,
            min_delay: Duration::from_millis(200),
        }
    }

    /// Source-B has no documented hard cap in scope; stay conservative.
    pub fn sheets() -> Self {
        Self {
            requests_per_minute: 300,
            max_concurrency: 4,
            min_delay: Duration::from_millis(100),
        }
    }
}

/// Bounds both concurrency (via a semaphore) and pacing (via a shared
/// last-request timestamp), so a burst of concurrent callers still spaces
/// requests out by at least `min_delay`.
pub struct TokenBucket {
    semaphore: Semaphore,
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl TokenBucket {
    pub fn new(limit: RateLimit) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Semaphore::new(limit.max_concurrency.max(1)),
            min_delay: limit.min_delay,
            last_request: Mutex::new(None),
        })
    }

    /// Acquires a concurrency slot and waits out any remaining pacing
    /// delay since the previous request. Drop the returned permit to
    /// release the slot.
    pub async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("rate limiter semaphore never closed");

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        permit
    }
}

/// Exponential backoff with jitter for RATE_LIMIT/NETWORK retries (§4.2,
/// §7): 2s, 4s, 8s... capped at 30s, default max 3 attempts.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.min(8);
    let backoff = base.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX).max(1));
    let backoff = backoff.min(cap);
    let jitter_ms = rand::Rng::gen_range(&mut rand::thread_rng(), 0..=(backoff.as_millis() as u64 / 5).max(1));
    backoff + Duration::from_millis(jitter_ms)
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_respects_cap() {
        let first = backoff_delay(0, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP);
        let third = backoff_delay(2, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP);
        assert!(first >= Duration::from_secs(2));
        assert!(third >= Duration::from_secs(8));
        let huge = backoff_delay(20, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP);
        assert!(huge <= DEFAULT_BACKOFF_CAP + Duration::from_millis(DEFAULT_BACKOFF_CAP.as_millis() as u64 / 5 + 1));
    }

    #[tokio::test]
    async fn bucket_enforces_min_delay() {
        let bucket = TokenBucket::new(RateLimit {
            requests_per_minute: 600,
            max_concurrency: 4,
            min_delay: Duration::from_millis(50),
        });
        let start = Instant::now();
        {
            let _p = bucket.acquire().await;
        }
        {
            let _p = bucket.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
