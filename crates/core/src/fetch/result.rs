use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a symbol did not produce a cache entry in a fetch cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// Retry budget exhausted on a retryable provider failure.
    Transient,
    Permanent,
    /// Provider answered, but had no quote for the symbol.
    NoData,
    /// Not started, or still pending, when the cycle deadline passed.
    DeadlineExceeded,
    /// Not started because the cycle was aborted.
    Aborted,
    /// Fetched, but the cache write failed.
    CacheUnavailable,
}

impl FailureReason {
    pub const ALL: [FailureReason; 6] = [
        FailureReason::Transient,
        FailureReason::Permanent,
        FailureReason::NoData,
        FailureReason::DeadlineExceeded,
        FailureReason::Aborted,
        FailureReason::CacheUnavailable,
    ];

    /// Metric label value.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Transient => "transient",
            FailureReason::Permanent => "permanent",
            FailureReason::NoData => "no_data",
            FailureReason::DeadlineExceeded => "deadline_exceeded",
            FailureReason::Aborted => "aborted",
            FailureReason::CacheUnavailable => "cache_unavailable",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFailure {
    pub symbol: String,
    pub reason: FailureReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SymbolFailure {
    pub fn new(symbol: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            symbol: symbol.into(),
            reason,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Outcome of one fetch cycle.
///
/// Every configured symbol lands in exactly one of `succeeded` or `failed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchCycleResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<SymbolFailure>,
    /// Set when the cycle stopped early, e.g. on an unreachable cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Provider calls spent, retries included.
    pub provider_calls: usize,
}

impl FetchCycleResult {
    /// A cycle that never reached the provider. Every symbol fails with
    /// [`FailureReason::Aborted`].
    pub fn aborted_before_start(
        symbols: &[String],
        started_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            attempted: symbols.len(),
            succeeded: Vec::new(),
            failed: symbols
                .iter()
                .map(|s| SymbolFailure::new(s.as_str(), FailureReason::Aborted))
                .collect(),
            aborted: Some(reason.into()),
            provider_calls: 0,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn failures_with(&self, reason: FailureReason) -> usize {
        self.failed.iter().filter(|f| f.reason == reason).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.succeeded.len() + self.failed.len() == self.attempted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_before_start_accounts_for_every_symbol() {
        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let result = FetchCycleResult::aborted_before_start(&symbols, Utc::now(), "cache down");

        assert!(result.is_aborted());
        assert!(result.is_consistent());
        assert_eq!(result.failures_with(FailureReason::Aborted), 2);
    }

    #[test]
    fn test_reason_serializes_screaming_case() {
        let json = serde_json::to_string(&FailureReason::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"DEADLINE_EXCEEDED\"");
    }
}
