//! Client-side throttling of requests to the API server.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Client-side rate limits for requests to the API server.
///
/// Used in: [`Config::rate_limits`](crate::config::Config::rate_limits)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimits {
    /// The sustained number of requests per second across all workers.
    ///
    /// Defaults to `500`. `0` disables client-side rate limiting.
    pub qps: u32,

    /// The maximum number of requests that can be sent in a burst.
    ///
    /// Defaults to `500`. Values below `1` are treated as `1`.
    pub burst: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            qps: 500,
            burst: 500,
        }
    }
}

/// Throttles outgoing requests to the configured [`RateLimits`].
///
/// Callers wait in [`acquire`](Self::acquire) until a token becomes available. The limiter is
/// shared by all workers, so the limit applies to the process as a whole.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Creates a limiter for `config`. A `qps` of `0` never waits.
    pub fn new(config: &RateLimits) -> Self {
        let bucket = (config.qps > 0).then(|| Mutex::new(TokenBucket::new(config.qps, config.burst)));
        Self { bucket }
    }

    /// Waits until a request may be sent.
    pub async fn acquire(&self) {
        let Some(ref bucket) = self.bucket else {
            return;
        };

        loop {
            // NB: We intentionally use unwrap and crash if the mutex is poisoned.
            let wait = match bucket.lock().unwrap().try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// A token bucket rate limiter.
///
/// Tokens refill continuously at a constant rate up to capacity. Each request consumes one token.
///
/// This implementation is not thread-safe on its own. Wrap in a `Mutex` for concurrent access.
#[derive(Debug)]
struct TokenBucket {
    refill_rate: f64,
    capacity: f64,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Creates a new, full token bucket.
    ///
    /// - `rps`: tokens refilled per second (sustained rate limit)
    /// - `burst`: capacity of the bucket
    fn new(rps: u32, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            refill_rate: rps as f64,
            capacity,
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Attempts to acquire a token from the bucket.
    ///
    /// Returns the time until the next token is available if the bucket is empty.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        let refill = now.duration_since(self.last_update).as_secs_f64() * self.refill_rate;
        self.tokens = (self.tokens + refill).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::new(&RateLimits { qps: 2, burst: 3 });

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill() {
        let limiter = RateLimiter::new(&RateLimits { qps: 2, burst: 1 });

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // One token up front, then one every 500ms.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_qps_is_unlimited() {
        let limiter = RateLimiter::new(&RateLimits { qps: 0, burst: 0 });

        let start = Instant::now();
        for _ in 0..10_000 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn bucket_never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(1000, 2);
        bucket.last_update -= Duration::from_secs(60);

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }
}
