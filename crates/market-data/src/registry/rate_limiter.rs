//! Token bucket rate limiter for market data providers.
//!
//! Every fetch against a provider draws from that provider's bucket, so
//! concurrent workers in one fetch cycle share a single budget. Running out
//! of tokens means waiting, never failing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::provider::RateLimit;

/// Token bucket for a single provider.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
}

impl TokenBucket {
    fn from_config(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: f64::from(config.requests_per_minute.max(1)) / 60.0,
            capacity,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Take a token, or report how long until one is available.
    fn take(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Rate limiter configuration for a provider.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl From<RateLimit> for RateLimitConfig {
    fn from(limit: RateLimit) -> Self {
        Self {
            requests_per_minute: limit.requests_per_minute,
            burst: limit.burst,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimit::default().into()
    }
}

/// Thread-safe rate limiter that maintains per-provider token buckets.
///
/// Buckets are created on first use from the provider's configured limit,
/// falling back to [`RateLimitConfig::default`].
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    configs: Mutex<HashMap<String, RateLimitConfig>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the buckets mutex, recovering from poison if necessary.
    ///
    /// A poisoned bucket map at worst paces slightly wrong; the data inside
    /// is still usable.
    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter buckets mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_configs(&self) -> MutexGuard<'_, HashMap<String, RateLimitConfig>> {
        self.configs.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter configs mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Configure rate limits for a provider, resetting any existing bucket.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        self.lock_configs().insert(provider.to_string(), config);
        self.lock_buckets().remove(provider);
    }

    /// Wait until a token for `provider` is available and take it.
    ///
    /// Returns the total time spent waiting.
    pub async fn acquire(&self, provider: &str) -> Duration {
        let started = Instant::now();
        loop {
            let wait_time = match self.take(provider) {
                Ok(()) => return started.elapsed(),
                Err(wait) => wait,
            };

            debug!(
                "Rate limiter: waiting {:?} for provider '{}'",
                wait_time, provider
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Take a token without waiting. Returns false if rate limited.
    pub fn try_acquire(&self, provider: &str) -> bool {
        self.take(provider).is_ok()
    }

    fn take(&self, provider: &str) -> Result<(), Duration> {
        let mut buckets = self.lock_buckets();
        buckets
            .entry(provider.to_string())
            .or_insert_with(|| self.create_bucket(provider))
            .take()
    }

    fn create_bucket(&self, provider: &str) -> TokenBucket {
        let configs = self.lock_configs();
        let config = configs.get(provider).cloned().unwrap_or_default();
        TokenBucket::from_config(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(requests_per_minute: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute,
            burst,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_exhausted() {
        let limiter = RateLimiter::new();
        limiter.configure("FINNHUB", config(60, 3));

        for _ in 0..3 {
            assert!(limiter.try_acquire("FINNHUB"));
        }
        assert!(!limiter.try_acquire("FINNHUB"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new();
        limiter.configure("FINNHUB", config(60, 1)); // 1 token/second

        assert!(limiter.try_acquire("FINNHUB"));
        assert!(!limiter.try_acquire("FINNHUB"));

        tokio::time::advance(Duration::from_millis(1_100)).await;
        assert!(limiter.try_acquire("FINNHUB"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_isolated() {
        let limiter = RateLimiter::new();
        limiter.configure("A", config(60, 1));
        limiter.configure("B", config(60, 1));

        assert!(limiter.try_acquire("A"));
        assert!(!limiter.try_acquire("A"));
        assert!(limiter.try_acquire("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_instead_of_failing() {
        let limiter = RateLimiter::new();
        limiter.configure("FINNHUB", config(60, 2));

        assert_eq!(limiter.acquire("FINNHUB").await, Duration::ZERO);
        assert_eq!(limiter.acquire("FINNHUB").await, Duration::ZERO);

        // Third token needs ~1s of refill at 60/min
        let waited = limiter.acquire("FINNHUB").await;
        assert!(waited >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_resets_bucket() {
        let limiter = RateLimiter::new();
        limiter.configure("FINNHUB", config(60, 1));
        assert!(limiter.try_acquire("FINNHUB"));
        assert!(!limiter.try_acquire("FINNHUB"));

        limiter.configure("FINNHUB", config(60, 2));
        assert!(limiter.try_acquire("FINNHUB"));
    }
}
