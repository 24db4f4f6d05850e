//! Provider Client - the facade the fetch scheduler talks to.
//!
//! Wraps a single [`MarketDataProvider`] with:
//! - a token-bucket [`RateLimiter`] shared by every caller of this client
//! - a per-request timeout
//! - bounded exponential backoff for [`RetryClass::Transient`] failures
//!
//! Permanent failures return on the first attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{MarketDataError, RetryClass, RetryPolicy};
use crate::models::{normalize_symbol, FetchOutcome};
use crate::provider::{MarketDataProvider, RateLimit};
use crate::registry::{RateLimitConfig, RateLimiter};

/// Tuning for [`ProviderClient`].
#[derive(Clone, Debug)]
pub struct ProviderClientConfig {
    /// Upper bound for a single provider call.
    pub request_timeout: Duration,
    /// Backoff policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for ProviderClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::provider_default(),
        }
    }
}

/// Outcome of [`ProviderClient::fetch_reported`], including how many
/// provider calls were spent on it.
#[derive(Debug)]
pub struct FetchReport {
    pub result: Result<FetchOutcome, MarketDataError>,
    pub attempts: usize,
}

pub struct ProviderClient {
    provider: Arc<dyn MarketDataProvider>,
    limiter: Arc<RateLimiter>,
    config: ProviderClientConfig,
}

impl ProviderClient {
    /// Create a client whose rate limiter is configured from the provider's
    /// declared [`RateLimit`].
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: ProviderClientConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new());
        limiter.configure(provider.id(), RateLimitConfig::from(provider.rate_limit()));
        Self {
            provider,
            limiter,
            config,
        }
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.provider.rate_limit()
    }

    /// Fetch the latest quote for `symbol`.
    pub async fn fetch(&self, symbol: &str) -> Result<FetchOutcome, MarketDataError> {
        self.fetch_reported(symbol).await.result
    }

    /// Fetch the latest quote for `symbol`, reporting the attempts spent.
    pub async fn fetch_reported(&self, symbol: &str) -> FetchReport {
        let symbol = normalize_symbol(symbol);
        let provider_id = self.provider.id();
        let mut attempts = 0;

        let result = self
            .config
            .retry
            .retry_async(
                |attempt| {
                    attempts = attempt + 1;
                    self.call_once(&symbol, attempt)
                },
                |err: &MarketDataError| {
                    let retry = err.retry_class() == RetryClass::Transient;
                    if retry {
                        warn!("{} transient failure for {}: {}", provider_id, symbol, err);
                    }
                    retry
                },
            )
            .await;

        FetchReport { result, attempts }
    }

    async fn call_once(
        &self,
        symbol: &str,
        attempt: usize,
    ) -> Result<FetchOutcome, MarketDataError> {
        let provider_id = self.provider.id();
        let waited = self.limiter.acquire(provider_id).await;
        if !waited.is_zero() {
            debug!("{} paced {:?} before {}", provider_id, waited, symbol);
        }

        debug!("{} fetch {} (attempt {})", provider_id, symbol, attempt + 1);
        match tokio::time::timeout(
            self.config.request_timeout,
            self.provider.get_latest_quote(symbol),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                provider: provider_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quote;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider that replays a script of results, then repeats the last one.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<FetchOutcome, MarketDataError>>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<FetchOutcome, MarketDataError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            "SCRIPTED"
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                requests_per_minute: 600,
                burst: 100,
            }
        }

        async fn get_latest_quote(&self, symbol: &str) -> Result<FetchOutcome, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(result) => result,
                None => Ok(FetchOutcome::Quote(Quote::new(symbol, None, 1.0, "SCRIPTED"))),
            }
        }
    }

    fn timeout_err() -> MarketDataError {
        MarketDataError::Timeout {
            provider: "SCRIPTED".to_string(),
        }
    }

    fn client(provider: Arc<ScriptedProvider>) -> ProviderClient {
        ProviderClient::new(
            provider,
            ProviderClientConfig {
                request_timeout: Duration::from_secs(2),
                retry: RetryPolicy::new(3, 10, 100, 0.0),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(timeout_err())]));
        let report = client(provider.clone()).fetch_reported("aapl").await;

        let quote = report.result.unwrap().into_quote().unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(report.attempts, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_budget() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(timeout_err()),
            Err(timeout_err()),
            Err(timeout_err()),
            Err(timeout_err()),
        ]));
        let report = client(provider.clone()).fetch_reported("AAPL").await;

        assert!(matches!(report.result, Err(MarketDataError::Timeout { .. })));
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_fails_without_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            MarketDataError::SymbolNotFound("ZZZZ".to_string()),
        )]));
        let report = client(provider.clone()).fetch_reported("ZZZZ").await;

        assert!(matches!(
            report.result,
            Err(MarketDataError::SymbolNotFound(_))
        ));
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_is_not_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(FetchOutcome::NoData)]));
        let outcome = client(provider).fetch("MSFT").await.unwrap();
        assert_eq!(outcome, FetchOutcome::NoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_transient() {
        let provider = Arc::new(ScriptedProvider::hanging());
        let report = client(provider.clone()).fetch_reported("AAPL").await;

        let err = report.result.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(report.attempts, 3);
    }
}
