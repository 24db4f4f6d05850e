//! Pipeline metrics.
//!
//! Counters and gauges live in a private prometheus [`Registry`] and are
//! rendered in the text exposition format by [`PipelineMetrics::encode`].
//! The last cycle summaries are kept behind short-lived `RwLock`s for the
//! JSON status view. Jobs write, the HTTP surface only reads.
//!
//! One-shot processes build their metrics with [`PipelineMetrics::journaling`]
//! and hand the journal to a [`ReportQueue`]; the long-running process drains
//! the queue and [`PipelineMetrics::apply`]s each report, so cycles run from
//! cron show up on the same `/metrics` endpoint.

mod reports;

#[cfg(any(test, feature = "test-utils"))]
pub use reports::InMemoryReportQueue;
pub use reports::{CycleReport, ReportQueue};

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;

use crate::errors::{Error, Result};
use crate::fetch::{FailureReason, FetchCycleResult};
use crate::run_lock::JobKind;
use crate::transfer::TransferCycleResult;

/// Outcome of the most recent transfer invocation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TransferCycleResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSON view served at `/status`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub last_fetch: Option<FetchCycleResult>,
    pub last_fetch_success_at: Option<DateTime<Utc>>,
    pub last_transfer: Option<TransferSummary>,
    pub last_transfer_success_at: Option<DateTime<Utc>>,
    pub fetch_cycles_skipped: u64,
    pub transfer_cycles_skipped: u64,
}

#[derive(Default)]
struct LastSummaries {
    fetch: Option<FetchCycleResult>,
    fetch_success_at: Option<DateTime<Utc>>,
    transfer: Option<TransferSummary>,
    transfer_success_at: Option<DateTime<Utc>>,
}

pub struct PipelineMetrics {
    registry: Registry,

    fetch_cycles: IntCounterVec,
    fetch_successes: IntCounter,
    fetch_failures: IntCounterVec,
    fetch_provider_calls: IntCounter,
    last_fetch_timestamp: IntGauge,
    last_fetch_success_timestamp: IntGauge,
    last_fetch_succeeded: IntGauge,
    last_fetch_failed: IntGauge,

    transfer_cycles: IntCounterVec,
    transfer_invalid: IntCounter,
    transfer_upserted: IntCounter,
    transfer_store_attempts: IntCounter,
    transfer_batch_size: IntGauge,
    transfer_duration: Gauge,
    last_transfer_timestamp: IntGauge,
    last_transfer_success_timestamp: IntGauge,

    analytics_updated: IntCounter,
    analytics_failures: IntCounter,

    cycles_skipped: IntCounterVec,

    last: RwLock<LastSummaries>,
    /// Reports recorded since the last `take_journal`, when journaling.
    journal: Option<Mutex<Vec<CycleReport>>>,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            fetch_cycles: IntCounterVec::new(
                Opts::new("finpipe_fetch_cycles_total", "Fetch cycles by outcome"),
                &["outcome"],
            )?,
            fetch_successes: IntCounter::new(
                "finpipe_fetch_successes_total",
                "Symbols staged in the cache",
            )?,
            fetch_failures: IntCounterVec::new(
                Opts::new("finpipe_fetch_failures_total", "Symbol failures by reason"),
                &["reason"],
            )?,
            fetch_provider_calls: IntCounter::new(
                "finpipe_fetch_attempts_total",
                "Provider calls made, retries included",
            )?,
            last_fetch_timestamp: IntGauge::new(
                "finpipe_last_fetch_timestamp_seconds",
                "Unix time the last fetch cycle finished",
            )?,
            last_fetch_success_timestamp: IntGauge::new(
                "finpipe_last_fetch_success_timestamp_seconds",
                "Unix time of the last fetch cycle that staged at least one quote",
            )?,
            last_fetch_succeeded: IntGauge::new(
                "finpipe_last_fetch_succeeded",
                "Symbols staged by the last fetch cycle",
            )?,
            last_fetch_failed: IntGauge::new(
                "finpipe_last_fetch_failed",
                "Symbols failed in the last fetch cycle",
            )?,
            transfer_cycles: IntCounterVec::new(
                Opts::new("finpipe_transfer_cycles_total", "Transfer cycles by outcome"),
                &["outcome"],
            )?,
            transfer_invalid: IntCounter::new(
                "finpipe_transfer_invalid_total",
                "Staged entries quarantined as invalid",
            )?,
            transfer_upserted: IntCounter::new(
                "finpipe_transfer_upserted_total",
                "Rows upserted into the durable store",
            )?,
            transfer_store_attempts: IntCounter::new(
                "finpipe_transfer_store_attempts_total",
                "Batch writes attempted against the durable store",
            )?,
            transfer_batch_size: IntGauge::new(
                "finpipe_transfer_batch_size",
                "Rows in the last transfer batch",
            )?,
            transfer_duration: Gauge::new(
                "finpipe_transfer_duration_seconds",
                "Wall time of the last transfer cycle",
            )?,
            last_transfer_timestamp: IntGauge::new(
                "finpipe_last_transfer_timestamp_seconds",
                "Unix time the last transfer cycle finished",
            )?,
            last_transfer_success_timestamp: IntGauge::new(
                "finpipe_last_transfer_success_timestamp_seconds",
                "Unix time of the last successful transfer",
            )?,
            analytics_updated: IntCounter::new(
                "finpipe_analytics_updated_total",
                "Stock metric rows recomputed",
            )?,
            analytics_failures: IntCounter::new(
                "finpipe_analytics_failures_total",
                "Symbols whose stock metrics could not be recomputed",
            )?,
            cycles_skipped: IntCounterVec::new(
                Opts::new(
                    "finpipe_cycles_skipped_total",
                    "Invocations skipped because the job was already running",
                ),
                &["job"],
            )?,
            last: RwLock::new(LastSummaries::default()),
            journal: None,
            registry,
        };
        metrics.register_all()?;
        metrics.prime_labels();
        Ok(metrics)
    }

    fn register_all(&self) -> Result<()> {
        let r = &self.registry;
        r.register(Box::new(self.fetch_cycles.clone()))?;
        r.register(Box::new(self.fetch_successes.clone()))?;
        r.register(Box::new(self.fetch_failures.clone()))?;
        r.register(Box::new(self.fetch_provider_calls.clone()))?;
        r.register(Box::new(self.last_fetch_timestamp.clone()))?;
        r.register(Box::new(self.last_fetch_success_timestamp.clone()))?;
        r.register(Box::new(self.last_fetch_succeeded.clone()))?;
        r.register(Box::new(self.last_fetch_failed.clone()))?;
        r.register(Box::new(self.transfer_cycles.clone()))?;
        r.register(Box::new(self.transfer_invalid.clone()))?;
        r.register(Box::new(self.transfer_upserted.clone()))?;
        r.register(Box::new(self.transfer_store_attempts.clone()))?;
        r.register(Box::new(self.transfer_batch_size.clone()))?;
        r.register(Box::new(self.transfer_duration.clone()))?;
        r.register(Box::new(self.last_transfer_timestamp.clone()))?;
        r.register(Box::new(self.last_transfer_success_timestamp.clone()))?;
        r.register(Box::new(self.analytics_updated.clone()))?;
        r.register(Box::new(self.analytics_failures.clone()))?;
        r.register(Box::new(self.cycles_skipped.clone()))?;
        Ok(())
    }

    /// Materialize every label value so scrapes see zeros instead of gaps.
    fn prime_labels(&self) {
        for outcome in ["completed", "aborted"] {
            self.fetch_cycles.with_label_values(&[outcome]);
        }
        for reason in FailureReason::ALL {
            self.fetch_failures.with_label_values(&[reason.label()]);
        }
        for outcome in ["success", "failure"] {
            self.transfer_cycles.with_label_values(&[outcome]);
        }
        for job in [JobKind::Fetch, JobKind::Transfer] {
            self.cycles_skipped.with_label_values(&[job.as_str()]);
        }
    }

    /// Metrics that also keep every recorded report for [`Self::take_journal`].
    pub fn journaling() -> Result<Self> {
        let mut metrics = Self::new()?;
        metrics.journal = Some(Mutex::new(Vec::new()));
        Ok(metrics)
    }

    fn read_last(&self) -> RwLockReadGuard<'_, LastSummaries> {
        self.last.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_last(&self) -> RwLockWriteGuard<'_, LastSummaries> {
        self.last.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn journal(&self) -> Option<MutexGuard<'_, Vec<CycleReport>>> {
        self.journal
            .as_ref()
            .map(|j| j.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    // =========================================================================
    // Writers
    // =========================================================================

    pub fn record_fetch_cycle(&self, result: &FetchCycleResult) {
        self.record(CycleReport::Fetch(result.clone()));
    }

    pub fn record_transfer_success(&self, result: &TransferCycleResult) {
        self.record(CycleReport::TransferSucceeded(result.clone()));
    }

    pub fn record_transfer_failure(&self, error: &Error, store_attempts: usize) {
        self.record(CycleReport::TransferFailed {
            finished_at: Utc::now(),
            error: error.to_string(),
            store_attempts,
        });
    }

    pub fn record_analytics(&self, updated: usize, failed: usize) {
        self.record(CycleReport::Analytics { updated, failed });
    }

    pub fn record_skipped(&self, job: JobKind) {
        self.record(CycleReport::Skipped { job });
    }

    fn record(&self, report: CycleReport) {
        self.apply(&report);
        if let Some(mut journal) = self.journal() {
            journal.push(report);
        }
    }

    /// Reports recorded since the previous call. Empty unless journaling.
    pub fn take_journal(&self) -> Vec<CycleReport> {
        self.journal()
            .map(|mut journal| std::mem::take(&mut *journal))
            .unwrap_or_default()
    }

    /// Fold a report into the counters and last summaries. Replayed reports
    /// are not journaled again.
    pub fn apply(&self, report: &CycleReport) {
        match report {
            CycleReport::Fetch(result) => self.apply_fetch_cycle(result),
            CycleReport::TransferSucceeded(result) => self.apply_transfer_success(result),
            CycleReport::TransferFailed {
                finished_at,
                error,
                store_attempts,
            } => self.apply_transfer_failure(*finished_at, error, *store_attempts),
            CycleReport::Analytics { updated, failed } => {
                self.analytics_updated.inc_by(*updated as u64);
                self.analytics_failures.inc_by(*failed as u64);
            }
            CycleReport::Skipped { job } => {
                self.cycles_skipped.with_label_values(&[job.as_str()]).inc();
            }
        }
    }

    fn apply_fetch_cycle(&self, result: &FetchCycleResult) {
        let outcome = if result.is_aborted() { "aborted" } else { "completed" };
        self.fetch_cycles.with_label_values(&[outcome]).inc();
        self.fetch_successes.inc_by(result.succeeded.len() as u64);
        for failure in &result.failed {
            self.fetch_failures
                .with_label_values(&[failure.reason.label()])
                .inc();
        }
        self.fetch_provider_calls.inc_by(result.provider_calls as u64);

        let mut last = self.write_last();
        // A replayed cycle may be older than one already shown
        if last
            .fetch
            .as_ref()
            .is_some_and(|seen| seen.finished_at > result.finished_at)
        {
            return;
        }

        let finished = result.finished_at.timestamp();
        self.last_fetch_timestamp.set(finished);
        self.last_fetch_succeeded.set(result.succeeded.len() as i64);
        self.last_fetch_failed.set(result.failed.len() as i64);
        if !result.succeeded.is_empty() {
            self.last_fetch_success_timestamp.set(finished);
            last.fetch_success_at = Some(result.finished_at);
        }
        last.fetch = Some(result.clone());
    }

    fn apply_transfer_success(&self, result: &TransferCycleResult) {
        self.transfer_cycles.with_label_values(&["success"]).inc();
        self.transfer_invalid.inc_by(result.invalid as u64);
        self.transfer_upserted.inc_by(result.upserted as u64);
        self.transfer_store_attempts.inc_by(result.store_attempts as u64);

        let mut last = self.write_last();
        if is_older(&last.transfer, result.finished_at) {
            return;
        }

        self.transfer_batch_size.set(result.batch_size as i64);
        self.transfer_duration.set(result.duration_secs());
        let finished = result.finished_at.timestamp();
        self.last_transfer_timestamp.set(finished);
        self.last_transfer_success_timestamp.set(finished);

        last.transfer_success_at = Some(result.finished_at);
        last.transfer = Some(TransferSummary {
            finished_at: result.finished_at,
            succeeded: true,
            result: Some(result.clone()),
            error: None,
        });
    }

    fn apply_transfer_failure(
        &self,
        finished_at: DateTime<Utc>,
        error: &str,
        store_attempts: usize,
    ) {
        self.transfer_cycles.with_label_values(&["failure"]).inc();
        self.transfer_store_attempts.inc_by(store_attempts as u64);

        let mut last = self.write_last();
        if is_older(&last.transfer, finished_at) {
            return;
        }
        self.last_transfer_timestamp.set(finished_at.timestamp());
        last.transfer = Some(TransferSummary {
            finished_at,
            succeeded: false,
            result: None,
            error: Some(error.to_string()),
        });
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Unexpected(e.to_string()))
    }

    pub fn status(&self) -> StatusSnapshot {
        let last = self.read_last();
        StatusSnapshot {
            last_fetch: last.fetch.clone(),
            last_fetch_success_at: last.fetch_success_at,
            last_transfer: last.transfer.clone(),
            last_transfer_success_at: last.transfer_success_at,
            fetch_cycles_skipped: self.skipped(JobKind::Fetch),
            transfer_cycles_skipped: self.skipped(JobKind::Transfer),
        }
    }

    pub fn skipped(&self, job: JobKind) -> u64 {
        self.cycles_skipped.with_label_values(&[job.as_str()]).get()
    }

    pub fn fetch_failures(&self, reason: FailureReason) -> u64 {
        self.fetch_failures.with_label_values(&[reason.label()]).get()
    }

    pub fn transfer_cycles(&self, succeeded: bool) -> u64 {
        let outcome = if succeeded { "success" } else { "failure" };
        self.transfer_cycles.with_label_values(&[outcome]).get()
    }
}

fn is_older(seen: &Option<TransferSummary>, finished_at: DateTime<Utc>) -> bool {
    seen.as_ref().is_some_and(|seen| seen.finished_at > finished_at)
}
