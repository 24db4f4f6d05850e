//! In-memory [`QuoteStore`] used by tests and the integration suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{PersistedQuote, QuoteRecord};
use super::store::QuoteStore;
use crate::errors::{DatabaseError, Error, Result};

type Rows = BTreeMap<(String, DateTime<Utc>), PersistedQuote>;

/// Map-backed quote store.
///
/// Batches are applied under a single write lock, so a batch is either fully
/// visible or not at all. `fail_next_upserts` makes the next N batch writes
/// fail before touching any row. `set_reachable(false)` makes `ping` fail.
pub struct InMemoryQuoteStore {
    rows: RwLock<Rows>,
    failures_left: AtomicUsize,
    upsert_calls: AtomicUsize,
    reachable: AtomicBool,
}

impl Default for InMemoryQuoteStore {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Rows::new()),
            failures_left: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
        }
    }
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to [`QuoteStore::upsert_batch`] with
    /// [`Error::DurableStoreUnavailable`].
    pub fn fail_next_upserts(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of `upsert_batch` calls received, failed ones included.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Copy of every row, ordered by `(symbol, observed_at)`.
    pub fn rows(&self) -> Vec<PersistedQuote> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Rows> {
        self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rows> {
        self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn upsert_batch(&self, records: &[QuoteRecord]) -> Result<usize> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(Error::DurableStoreUnavailable(
                DatabaseError::ConnectionFailed("injected failure".to_string()),
            ));
        }

        let now = Utc::now();
        let mut rows = self.write();
        for record in records {
            rows.insert(
                (record.symbol.clone(), record.observed_at),
                PersistedQuote::from_record(record, now),
            );
        }
        Ok(records.len())
    }

    fn ping(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::DurableStoreUnavailable(
                DatabaseError::ConnectionFailed("store marked unreachable".to_string()),
            ))
        }
    }

    fn latest(&self, symbol: &str) -> Result<Option<PersistedQuote>> {
        Ok(self
            .read()
            .values()
            .filter(|row| row.symbol == symbol)
            .max_by_key(|row| row.observed_at)
            .cloned())
    }

    fn range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedQuote>> {
        Ok(self
            .read()
            .values()
            .filter(|row| row.symbol == symbol && row.observed_at >= start && row.observed_at <= end)
            .cloned()
            .collect())
    }

    fn total_records(&self) -> Result<usize> {
        Ok(self.read().len())
    }

    fn symbols(&self) -> Result<Vec<String>> {
        let mut symbols: Vec<String> = self.read().keys().map(|(s, _)| s.clone()).collect();
        symbols.dedup();
        Ok(symbols)
    }
}
