use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Classification for retry policy.
///
/// | Class | Retry the same symbol? |
/// |-------|------------------------|
/// | `Transient` | Yes, with backoff, until the attempt budget is spent |
/// | `Permanent` | No, the symbol fails immediately |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Timeout, 429/5xx-equivalent, connection reset.
    Transient,

    /// Unknown symbol, malformed response, auth failure.
    Permanent,
}

/// Jittered exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Three attempts, 500ms doubling up to 8s. Used for provider calls.
    pub fn provider_default() -> Self {
        Self::new(3, 500, 8_000, 0.2)
    }

    /// Three attempts, 2s doubling up to 30s. Used for durable batch writes.
    pub fn batch_default() -> Self {
        Self::new(3, 2_000, 30_000, 0.2)
    }

    /// Same budget with the given number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub(crate) fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let jittered = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }

    /// Runs `op` until it succeeds, `should_retry` rejects the error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt index.
    pub async fn retry_async<F, Fut, T, E, P>(&self, mut op: F, mut should_retry: P) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    sleep(self.next_delay(attempt - 1)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::provider_default()
    }
}
