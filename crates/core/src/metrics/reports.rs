//! Cycle reports and the queue that carries them between processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::fetch::FetchCycleResult;
use crate::run_lock::JobKind;
use crate::transfer::TransferCycleResult;

/// One event recorded by [`super::PipelineMetrics`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleReport {
    Fetch(FetchCycleResult),
    TransferSucceeded(TransferCycleResult),
    TransferFailed {
        finished_at: DateTime<Utc>,
        error: String,
        store_attempts: usize,
    },
    Analytics {
        updated: usize,
        failed: usize,
    },
    Skipped {
        job: JobKind,
    },
}

impl CycleReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Unexpected(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Unexpected(e.to_string()))
    }
}

/// Hand-off of reports from one-shot runs to the serving process.
#[async_trait]
pub trait ReportQueue: Send + Sync {
    /// Append reports in order.
    async fn publish(&self, reports: &[CycleReport]) -> Result<()>;

    /// Remove and return everything queued, oldest first.
    async fn drain(&self) -> Result<Vec<CycleReport>>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryReportQueue;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{CycleReport, ReportQueue};
    use crate::errors::Result;

    /// Queue that keeps reports as JSON strings, so tests exercise the same
    /// encoding the Redis list uses.
    #[derive(Default)]
    pub struct InMemoryReportQueue {
        items: Mutex<Vec<String>>,
    }

    impl InMemoryReportQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.items.lock().map(|items| items.len()).unwrap_or_default()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl ReportQueue for InMemoryReportQueue {
        async fn publish(&self, reports: &[CycleReport]) -> Result<()> {
            let encoded = reports
                .iter()
                .map(CycleReport::to_json)
                .collect::<Result<Vec<_>>>()?;
            let mut items = self
                .items
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            items.extend(encoded);
            Ok(())
        }

        async fn drain(&self) -> Result<Vec<CycleReport>> {
            let raw = std::mem::take(
                &mut *self
                    .items
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            );
            raw.iter().map(|r| CycleReport::from_json(r)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FailureReason, SymbolFailure};

    fn fetch_report() -> CycleReport {
        let now = Utc::now();
        CycleReport::Fetch(FetchCycleResult {
            started_at: now,
            finished_at: now,
            attempted: 2,
            succeeded: vec!["AAPL".to_string()],
            failed: vec![SymbolFailure::new("MSFT", FailureReason::NoData).with_message("empty")],
            aborted: None,
            provider_calls: 2,
        })
    }

    #[test]
    fn test_wire_form_is_tagged() {
        let raw = CycleReport::Skipped { job: JobKind::Transfer }.to_json().unwrap();
        assert_eq!(raw, r#"{"kind":"skipped","job":"transfer"}"#);

        let report = fetch_report();
        let raw = report.to_json().unwrap();
        assert!(raw.starts_with(r#"{"kind":"fetch","startedAt":"#));
        assert!(raw.contains(r#""reason":"NO_DATA""#));
        assert_eq!(CycleReport::from_json(&raw).unwrap(), report);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(CycleReport::from_json(r#"{"kind":"reboot"}"#).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_queue_drains_in_order() {
        let queue = InMemoryReportQueue::new();
        let first = fetch_report();
        let second = CycleReport::Analytics { updated: 3, failed: 1 };
        queue.publish(&[first.clone()]).await.unwrap();
        queue.publish(&[second.clone()]).await.unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain().await.unwrap(), vec![first, second]);
        assert!(queue.is_empty());
        assert!(queue.drain().await.unwrap().is_empty());
    }
}
