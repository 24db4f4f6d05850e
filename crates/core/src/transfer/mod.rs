//! Transfer Job.
//!
//! Drains the current cache snapshot into the durable store:
//!
//! 1. snapshot every staged entry
//! 2. decode and validate; quarantine what fails
//! 3. keep the latest fetch per `(symbol, observed_at)`
//! 4. upsert the batch in one transaction, retrying store failures
//! 5. remove exactly the snapshot keys that were committed
//! 6. recompute stock metrics for the affected symbols
//!
//! Entries staged after the snapshot are left for the next cycle. A store
//! failure that outlives the retry budget leaves the cache untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use finpipe_market_data::RetryPolicy;

use crate::analytics::{AnalyticsJob, AnalyticsSummary};
use crate::cache::CacheStore;
use crate::errors::{Error, Result};
use crate::metrics::PipelineMetrics;
use crate::quotes::{dedup_latest, CacheEntry, CacheKey, QuoteRecord, QuoteStore, StagedEntry};
use crate::run_lock::{run_exclusive, Invocation, JobKind, RunLock};

#[derive(Clone, Debug)]
pub struct TransferConfig {
    /// Backoff for durable batch writes.
    pub retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::batch_default(),
        }
    }
}

/// Outcome of a successful transfer cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCycleResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Staged entries seen by the snapshot.
    pub snapshot_size: usize,
    /// Entries that failed validation and were quarantined.
    pub invalid: usize,
    /// Valid entries dropped in favor of a later fetch of the same observation.
    pub superseded: usize,
    pub batch_size: usize,
    pub upserted: usize,
    /// Cache keys removed after commit.
    pub retired: usize,
    /// Batch writes attempted, zero for an empty batch.
    pub store_attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsSummary>,
}

impl TransferCycleResult {
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

pub struct TransferJob {
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn QuoteStore>,
    lock: Arc<dyn RunLock>,
    metrics: Arc<PipelineMetrics>,
    retry: RetryPolicy,
    analytics: Option<Arc<AnalyticsJob>>,
}

impl TransferJob {
    pub fn new(
        config: TransferConfig,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn QuoteStore>,
        lock: Arc<dyn RunLock>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            store,
            lock,
            metrics,
            retry: config.retry,
            analytics: None,
        }
    }

    /// Recompute stock metrics after every successful transfer.
    pub fn with_analytics(mut self, analytics: Arc<AnalyticsJob>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Run one cycle under the transfer run lock.
    pub async fn invoke(&self) -> Result<Invocation<TransferCycleResult>> {
        match run_exclusive(self.lock.as_ref(), JobKind::Transfer, self.run_cycle()).await {
            Ok(Invocation::Skipped) => {
                self.metrics.record_skipped(JobKind::Transfer);
                Ok(Invocation::Skipped)
            }
            Ok(Invocation::Completed(result)) => result.map(Invocation::Completed),
            Err(e) => {
                error!("Transfer cycle not started, run lock unavailable: {}", e);
                self.metrics.record_transfer_failure(&e, 0);
                Err(e)
            }
        }
    }

    /// Run one cycle without taking the run lock.
    pub async fn run_cycle(&self) -> Result<TransferCycleResult> {
        let started_at = Utc::now();

        let snapshot = match self.cache.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Transfer cycle failed reading the cache: {}", e);
                self.metrics.record_transfer_failure(&e, 0);
                return Err(e);
            }
        };
        let snapshot_size = snapshot.len();
        info!("Transfer cycle starting: {} staged entries", snapshot_size);

        let (valid, invalid) = partition_valid(snapshot);
        if !invalid.is_empty() {
            match self.cache.quarantine(&invalid).await {
                Ok(n) => warn!("Quarantined {} invalid staged entries", n),
                Err(e) => warn!("Failed to quarantine invalid entries: {}", e),
            }
        }

        let batch: Vec<QuoteRecord> = dedup_latest(&valid)
            .into_iter()
            .map(|entry| entry.record.clone())
            .collect();
        let superseded = valid.len() - batch.len();

        let mut store_attempts = 0;
        let upserted = if batch.is_empty() {
            0
        } else {
            let written = self
                .retry
                .retry_async(
                    |attempt| {
                        store_attempts = attempt + 1;
                        self.store.upsert_batch(&batch)
                    },
                    |e: &Error| {
                        let retry = e.is_retryable_store_error();
                        if retry {
                            warn!("Durable store write failed, will retry: {}", e);
                        }
                        retry
                    },
                )
                .await;
            match written {
                Ok(n) => n,
                Err(e) => {
                    error!(
                        "Transfer cycle failed after {} attempts, cache left intact: {}",
                        store_attempts, e
                    );
                    self.metrics.record_transfer_failure(&e, store_attempts);
                    return Err(e);
                }
            }
        };

        let retired = self.retire(&valid).await;
        let analytics = self.recompute_analytics(&batch).await;

        let result = TransferCycleResult {
            started_at,
            finished_at: Utc::now(),
            snapshot_size,
            invalid: invalid.len(),
            superseded,
            batch_size: batch.len(),
            upserted,
            retired,
            store_attempts,
            analytics,
        };
        info!(
            "Transfer cycle finished: {} upserted, {} retired, {} invalid",
            result.upserted, result.retired, result.invalid
        );
        self.metrics.record_transfer_success(&result);
        Ok(result)
    }

    /// Remove every committed key, superseded duplicates included.
    ///
    /// A failure here is not fatal: the rows are committed, and replaying the
    /// same entries next cycle upserts identical values.
    async fn retire(&self, committed: &[CacheEntry]) -> usize {
        if committed.is_empty() {
            return 0;
        }
        let keys: Vec<CacheKey> = committed.iter().map(|entry| entry.key.clone()).collect();
        match self.cache.remove(&keys).await {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    "Committed {} entries but could not retire them: {}",
                    keys.len(),
                    e
                );
                0
            }
        }
    }

    async fn recompute_analytics(&self, batch: &[QuoteRecord]) -> Option<AnalyticsSummary> {
        let analytics = self.analytics.as_ref()?;
        if batch.is_empty() {
            return None;
        }
        let symbols: Vec<String> = batch
            .iter()
            .map(|record| record.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let summary = analytics
            .recompute(&symbols, Utc::now().date_naive())
            .await;
        self.metrics
            .record_analytics(summary.updated, summary.failed);
        Some(summary)
    }
}

fn partition_valid(snapshot: Vec<StagedEntry>) -> (Vec<CacheEntry>, Vec<StagedEntry>) {
    let mut valid = Vec::with_capacity(snapshot.len());
    let mut invalid = Vec::new();
    for staged in snapshot {
        match CacheEntry::decode(&staged) {
            Ok(entry) => valid.push(entry),
            Err(e) => {
                warn!("Excluding staged entry {}: {}", staged.key, e);
                invalid.push(staged);
            }
        }
    }
    (valid, invalid)
}
