//! Fetch Scheduler.
//!
//! One invocation pulls every configured symbol through the provider client
//! and stages each quote in the cache. Per-symbol failures are contained; an
//! unreachable cache aborts the cycle. Exactly one [`FetchCycleResult`] is
//! recorded per invocation that acquires the run lock.

mod result;

pub use result::{FailureReason, FetchCycleResult, SymbolFailure};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use tokio::time::Instant;

use finpipe_market_data::{normalize_symbol, FetchOutcome, ProviderClient, RetryClass};

use crate::cache::CacheStore;
use crate::errors::{Error, Result};
use crate::metrics::PipelineMetrics;
use crate::quotes::{check_symbol, CacheEntry, QuoteRecord};
use crate::run_lock::{run_exclusive, Invocation, JobKind, RunLock};

/// Fetch cycle settings.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Symbol universe, processed in this order.
    pub symbols: Vec<String>,
    /// Wall-clock budget for one cycle.
    pub cycle_deadline: Duration,
    /// Worker bound. Defaults to the provider's requests-per-minute budget.
    pub max_concurrency: Option<usize>,
}

impl FetchConfig {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            cycle_deadline: Duration::from_secs(600),
            max_concurrency: None,
        }
    }
}

/// Per-symbol outcome inside a cycle.
struct SymbolReport {
    outcome: std::result::Result<(), SymbolFailure>,
    provider_calls: usize,
}

impl SymbolReport {
    fn failed(symbol: &str, reason: FailureReason, provider_calls: usize) -> Self {
        Self {
            outcome: Err(SymbolFailure::new(symbol, reason)),
            provider_calls,
        }
    }
}

pub struct FetchScheduler {
    client: Arc<ProviderClient>,
    cache: Arc<dyn CacheStore>,
    lock: Arc<dyn RunLock>,
    metrics: Arc<PipelineMetrics>,
    symbols: Vec<String>,
    cycle_deadline: Duration,
    workers: usize,
}

impl FetchScheduler {
    /// Build a scheduler. Symbols are normalized and deduplicated, keeping
    /// first-seen order. An empty universe, or a symbol too wide for the
    /// durable store, is rejected.
    pub fn new(
        config: FetchConfig,
        client: Arc<ProviderClient>,
        cache: Arc<dyn CacheStore>,
        lock: Arc<dyn RunLock>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let symbols = normalize_universe(&config.symbols)?;
        if symbols.is_empty() {
            return Err(Error::InvalidConfigValue(
                "fetch symbol set is empty".to_string(),
            ));
        }

        let budget = config
            .max_concurrency
            .unwrap_or(client.rate_limit().requests_per_minute as usize);
        let workers = budget.clamp(1, symbols.len());

        Ok(Self {
            client,
            cache,
            lock,
            metrics,
            symbols,
            cycle_deadline: config.cycle_deadline,
            workers,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run one cycle under the fetch run lock.
    ///
    /// A contended lock yields [`Invocation::Skipped`]. A lock that cannot be
    /// reached at all yields an aborted cycle result.
    pub async fn invoke(&self) -> Invocation<FetchCycleResult> {
        let started_at = Utc::now();
        match run_exclusive(self.lock.as_ref(), JobKind::Fetch, self.run_cycle()).await {
            Ok(Invocation::Skipped) => {
                self.metrics.record_skipped(JobKind::Fetch);
                Invocation::Skipped
            }
            Ok(completed) => completed,
            Err(e) => {
                error!("Fetch cycle aborted, run lock unavailable: {}", e);
                let result = FetchCycleResult::aborted_before_start(
                    &self.symbols,
                    started_at,
                    format!("run lock unavailable: {}", e),
                );
                self.metrics.record_fetch_cycle(&result);
                Invocation::Completed(result)
            }
        }
    }

    /// Run one cycle without taking the run lock.
    pub async fn run_cycle(&self) -> FetchCycleResult {
        let started_at = Utc::now();

        if let Err(e) = self.cache.ping().await {
            error!("Fetch cycle aborted before start: {}", e);
            let result =
                FetchCycleResult::aborted_before_start(&self.symbols, started_at, e.to_string());
            self.metrics.record_fetch_cycle(&result);
            return result;
        }

        info!(
            "Fetch cycle starting: {} symbols, {} workers",
            self.symbols.len(),
            self.workers
        );

        let deadline = Instant::now() + self.cycle_deadline;
        let abort_state: Mutex<Option<String>> = Mutex::new(None);
        let abort = &abort_state;
        let mut slots: Vec<Option<SymbolReport>> = self.symbols.iter().map(|_| None).collect();

        let mut reports = stream::iter(self.symbols.iter().cloned().enumerate())
            .map(move |(index, symbol)| async move {
                (index, self.fetch_symbol(&symbol, deadline, abort).await)
            })
            .buffer_unordered(self.workers);
        while let Some((index, report)) = reports.next().await {
            slots[index] = Some(report);
        }

        let mut result = FetchCycleResult {
            started_at,
            finished_at: Utc::now(),
            attempted: self.symbols.len(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            aborted: take_abort(abort),
            provider_calls: 0,
        };
        for (symbol, slot) in self.symbols.iter().zip(slots) {
            let report = slot.unwrap_or_else(|| {
                SymbolReport::failed(symbol, FailureReason::DeadlineExceeded, 0)
            });
            result.provider_calls += report.provider_calls;
            match report.outcome {
                Ok(()) => result.succeeded.push(symbol.clone()),
                Err(failure) => result.failed.push(failure),
            }
        }

        let late = result.failures_with(FailureReason::DeadlineExceeded);
        if late > 0 {
            warn!(
                "Fetch cycle deadline of {:?} reached, {} symbols not fetched",
                self.cycle_deadline, late
            );
        }
        info!(
            "Fetch cycle finished: {} staged, {} failed, {} provider calls",
            result.succeeded.len(),
            result.failed.len(),
            result.provider_calls
        );
        self.metrics.record_fetch_cycle(&result);
        result
    }

    /// The deadline bounds the provider call only. A cache write that has
    /// started is allowed to finish so the result matches what was staged.
    async fn fetch_symbol(
        &self,
        symbol: &str,
        deadline: Instant,
        abort: &Mutex<Option<String>>,
    ) -> SymbolReport {
        if is_aborted(abort) {
            return SymbolReport::failed(symbol, FailureReason::Aborted, 0);
        }
        if Instant::now() >= deadline {
            return SymbolReport::failed(symbol, FailureReason::DeadlineExceeded, 0);
        }

        let fetched = tokio::time::timeout_at(deadline, self.client.fetch_reported(symbol));
        let report = match fetched.await {
            Ok(report) => report,
            Err(_) => {
                warn!("Deadline reached while fetching {}", symbol);
                return SymbolReport::failed(symbol, FailureReason::DeadlineExceeded, 1);
            }
        };
        let calls = report.attempts;

        let quote = match report.result {
            Ok(FetchOutcome::Quote(quote)) => quote,
            Ok(FetchOutcome::NoData) => {
                info!("No data for {}", symbol);
                return SymbolReport::failed(symbol, FailureReason::NoData, calls);
            }
            Err(e) => {
                let reason = match e.retry_class() {
                    RetryClass::Transient => FailureReason::Transient,
                    RetryClass::Permanent => FailureReason::Permanent,
                };
                warn!("Fetch failed for {} ({}): {}", symbol, reason, e);
                return SymbolReport {
                    outcome: Err(SymbolFailure::new(symbol, reason).with_message(e.to_string())),
                    provider_calls: calls,
                };
            }
        };

        let record = QuoteRecord::from_provider(quote, Utc::now());
        if let Err(e) = record.validate() {
            warn!("Discarding invalid quote for {}: {}", symbol, e);
            return SymbolReport {
                outcome: Err(SymbolFailure::new(symbol, FailureReason::Permanent)
                    .with_message(e.to_string())),
                provider_calls: calls,
            };
        }

        let entry = CacheEntry::new(record);
        match self.cache.insert(&entry).await {
            Ok(()) => {
                debug!("Staged {} as {}", symbol, entry.key);
                SymbolReport {
                    outcome: Ok(()),
                    provider_calls: calls,
                }
            }
            Err(e) => {
                error!("Cache write failed for {}, aborting cycle: {}", symbol, e);
                set_abort(abort, e.to_string());
                SymbolReport {
                    outcome: Err(SymbolFailure::new(symbol, FailureReason::CacheUnavailable)
                        .with_message(e.to_string())),
                    provider_calls: calls,
                }
            }
        }
    }
}

fn normalize_universe(symbols: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut universe = Vec::with_capacity(symbols.len());
    for symbol in symbols.iter().map(|s| normalize_symbol(s)) {
        if symbol.is_empty() || !seen.insert(symbol.clone()) {
            continue;
        }
        check_symbol(&symbol)
            .map_err(|e| Error::InvalidConfigValue(format!("fetch symbol set: {}", e)))?;
        universe.push(symbol);
    }
    Ok(universe)
}

fn is_aborted(abort: &Mutex<Option<String>>) -> bool {
    abort
        .lock()
        .map(|state| state.is_some())
        .unwrap_or(true)
}

fn set_abort(abort: &Mutex<Option<String>>, reason: String) {
    let mut state = abort.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    state.get_or_insert(reason);
}

fn take_abort(abort: &Mutex<Option<String>>) -> Option<String> {
    abort
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::run_lock::LocalRunLock;
    use async_trait::async_trait;
    use finpipe_market_data::{
        MarketDataError, MarketDataProvider, ProviderClientConfig, Quote, RateLimit, RetryPolicy,
    };
    use std::collections::HashMap;

    /// Provider with a fixed behavior per symbol.
    #[derive(Clone)]
    enum Behavior {
        Price(f64),
        NoData,
        Unknown,
        Timeout,
        Hang,
    }

    struct MockProvider {
        behaviors: HashMap<String, Behavior>,
    }

    impl MockProvider {
        fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
            Arc::new(Self {
                behaviors: behaviors
                    .iter()
                    .map(|(s, b)| (s.to_string(), b.clone()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn id(&self) -> &'static str {
            "MOCK"
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                requests_per_minute: 6000,
                burst: 100,
            }
        }

        async fn get_latest_quote(&self, symbol: &str) -> std::result::Result<FetchOutcome, MarketDataError> {
            match self.behaviors.get(symbol).cloned().unwrap_or(Behavior::Unknown) {
                Behavior::Price(price) => Ok(FetchOutcome::Quote(Quote::new(
                    symbol,
                    Some(Utc::now()),
                    price,
                    "MOCK",
                ))),
                Behavior::NoData => Ok(FetchOutcome::NoData),
                Behavior::Unknown => Err(MarketDataError::SymbolNotFound(symbol.to_string())),
                Behavior::Timeout => Err(MarketDataError::Timeout {
                    provider: "MOCK".to_string(),
                }),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct Harness {
        scheduler: FetchScheduler,
        cache: Arc<InMemoryCacheStore>,
        metrics: Arc<PipelineMetrics>,
        lock: Arc<LocalRunLock>,
    }

    fn harness(behaviors: &[(&str, Behavior)], symbols: &[&str], deadline: Duration) -> Harness {
        let client = Arc::new(ProviderClient::new(
            MockProvider::new(behaviors),
            ProviderClientConfig {
                request_timeout: Duration::from_secs(5),
                retry: RetryPolicy::new(2, 10, 50, 0.0),
            },
        ));
        let cache = Arc::new(InMemoryCacheStore::new());
        let lock = Arc::new(LocalRunLock::new());
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let config = FetchConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            cycle_deadline: deadline,
            max_concurrency: None,
        };
        let scheduler =
            FetchScheduler::new(config, client, cache.clone(), lock.clone(), metrics.clone())
                .unwrap();
        Harness {
            scheduler,
            cache,
            metrics,
            lock,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_are_all_accounted_for() {
        let h = harness(
            &[
                ("AAPL", Behavior::Price(190.0)),
                ("MSFT", Behavior::NoData),
                ("GOOGL", Behavior::Timeout),
            ],
            &["AAPL", "MSFT", "GOOGL", "ZZZZ"],
            Duration::from_secs(60),
        );

        let result = h.scheduler.run_cycle().await;

        assert!(result.is_consistent());
        assert_eq!(result.attempted, 4);
        assert_eq!(result.succeeded, vec!["AAPL"]);
        assert_eq!(result.failures_with(FailureReason::NoData), 1);
        assert_eq!(result.failures_with(FailureReason::Transient), 1);
        assert_eq!(result.failures_with(FailureReason::Permanent), 1);
        // AAPL, MSFT, ZZZZ once each, GOOGL twice
        assert_eq!(result.provider_calls, 5);

        let staged = h.cache.entries();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].record.symbol, "AAPL");
        assert_eq!(h.metrics.fetch_failures(FailureReason::Transient), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_cache_aborts_before_fetching() {
        let h = harness(
            &[("AAPL", Behavior::Price(1.0))],
            &["AAPL", "MSFT"],
            Duration::from_secs(60),
        );
        h.cache.set_available(false);

        let result = h.scheduler.run_cycle().await;

        assert!(result.is_aborted());
        assert!(result.is_consistent());
        assert_eq!(result.provider_calls, 0);
        assert_eq!(result.failures_with(FailureReason::Aborted), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_write_failure_stops_new_symbols() {
        let h = harness(
            &[
                ("AAPL", Behavior::Price(1.0)),
                ("MSFT", Behavior::Price(2.0)),
                ("NVDA", Behavior::Price(3.0)),
            ],
            &["AAPL", "MSFT", "NVDA"],
            Duration::from_secs(60),
        );
        let mut config = FetchConfig::new(vec!["AAPL".into(), "MSFT".into(), "NVDA".into()]);
        config.max_concurrency = Some(1);
        let scheduler = FetchScheduler::new(
            config,
            h.scheduler.client.clone(),
            h.cache.clone(),
            h.lock.clone(),
            h.metrics.clone(),
        )
        .unwrap();
        h.cache.fail_inserts_after(1);

        let result = scheduler.run_cycle().await;

        assert!(result.is_aborted());
        assert!(result.is_consistent());
        assert_eq!(result.succeeded, vec!["AAPL"]);
        assert_eq!(result.failures_with(FailureReason::CacheUnavailable), 1);
        assert_eq!(result.failures_with(FailureReason::Aborted), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_pending_symbols() {
        let h = harness(
            &[("AAPL", Behavior::Price(1.0)), ("MSFT", Behavior::Hang)],
            &["AAPL", "MSFT"],
            Duration::from_secs(3),
        );

        let result = h.scheduler.run_cycle().await;

        assert!(result.is_consistent());
        assert!(!result.is_aborted());
        assert_eq!(result.succeeded, vec!["AAPL"]);
        assert_eq!(result.failures_with(FailureReason::DeadlineExceeded), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_cycles_append_distinct_entries() {
        let h = harness(
            &[("AAPL", Behavior::Price(1.0))],
            &["aapl", " AAPL "],
            Duration::from_secs(60),
        );
        assert_eq!(h.scheduler.symbols(), ["AAPL"]);

        h.scheduler.run_cycle().await;
        h.scheduler.run_cycle().await;

        let staged = h.cache.entries();
        assert_eq!(staged.len(), 2);
        assert_ne!(staged[0].key, staged[1].key);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_skips_while_locked() {
        let h = harness(
            &[("AAPL", Behavior::Price(1.0))],
            &["AAPL"],
            Duration::from_secs(60),
        );
        let token = h.lock.try_acquire(JobKind::Fetch).await.unwrap().unwrap();

        assert!(h.scheduler.invoke().await.is_skipped());
        assert_eq!(h.metrics.skipped(JobKind::Fetch), 1);
        assert!(h.cache.entries().is_empty());

        h.lock.release(token).await.unwrap();
        let result = h.scheduler.invoke().await.completed().unwrap();
        assert_eq!(result.succeeded, vec!["AAPL"]);
    }

    #[test]
    fn test_empty_universe_rejected() {
        let client = Arc::new(ProviderClient::new(
            MockProvider::new(&[]),
            ProviderClientConfig::default(),
        ));
        let result = FetchScheduler::new(
            FetchConfig::new(vec!["  ".to_string()]),
            client,
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(LocalRunLock::new()),
            Arc::new(PipelineMetrics::new().unwrap()),
        );
        assert!(matches!(result, Err(Error::InvalidConfigValue(_))));
    }

    #[test]
    fn test_symbol_wider_than_store_rejected() {
        let client = Arc::new(ProviderClient::new(
            MockProvider::new(&[]),
            ProviderClientConfig::default(),
        ));
        let result = FetchScheduler::new(
            FetchConfig::new(vec!["AAPL".to_string(), "coinbase:btc-usdt".to_string()]),
            client,
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(LocalRunLock::new()),
            Arc::new(PipelineMetrics::new().unwrap()),
        );
        match result {
            Err(Error::InvalidConfigValue(message)) => {
                assert!(message.contains("COINBASE:BTC-USDT"))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("over-long symbol accepted"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_cache_write_outlives_deadline() {
        let h = harness(
            &[("AAPL", Behavior::Price(1.0)), ("MSFT", Behavior::Price(2.0))],
            &["AAPL", "MSFT"],
            Duration::from_secs(3),
        );
        let mut config = FetchConfig::new(vec!["AAPL".into(), "MSFT".into()]);
        config.cycle_deadline = Duration::from_secs(3);
        config.max_concurrency = Some(1);
        let scheduler = FetchScheduler::new(
            config,
            h.scheduler.client.clone(),
            h.cache.clone(),
            h.lock.clone(),
            h.metrics.clone(),
        )
        .unwrap();
        h.cache.set_insert_delay(Duration::from_secs(5));

        let result = scheduler.run_cycle().await;

        assert!(result.is_consistent());
        assert_eq!(result.succeeded, vec!["AAPL"]);
        let late = &result.failed[0];
        assert_eq!(late.symbol, "MSFT");
        assert_eq!(late.reason, FailureReason::DeadlineExceeded);
        let staged = h.cache.entries();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].record.symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_invoke_runs_on_a_spawned_task() {
        let h = harness(
            &[("AAPL", Behavior::Price(1.0))],
            &["AAPL"],
            Duration::from_secs(60),
        );
        let scheduler = Arc::new(h.scheduler);

        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.invoke().await }
        });

        let result = task.await.unwrap().completed().unwrap();
        assert_eq!(result.succeeded, vec!["AAPL"]);
    }

    #[test]
    fn test_worker_bound_clamped_to_symbol_count() {
        let h = harness(&[], &["AAPL", "MSFT"], Duration::from_secs(60));
        assert_eq!(h.scheduler.workers(), 2);
    }
}
