//! Durable quote storage trait.
//!
//! Backends (PostgreSQL in production, `InMemoryQuoteStore` under `test-utils`)
//! implement this interface. The Transfer Job is the only writer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::{PersistedQuote, QuoteRecord};
use crate::errors::Result;

/// Storage interface for the historical quote series.
///
/// # Method Naming Convention
///
/// - `upsert_*` - insert, or update in place on `(symbol, observed_at)` conflict
/// - `latest` - most recent row for a symbol
/// - `range` - rows within an inclusive time window, oldest first
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Upserts the whole batch in a single transaction.
    ///
    /// Either every row is written or none is. The batch must not contain two
    /// records with the same `(symbol, observed_at)`.
    ///
    /// # Returns
    ///
    /// Number of rows inserted or updated
    async fn upsert_batch(&self, records: &[QuoteRecord]) -> Result<usize>;

    /// Cheap reachability check. Touches no table.
    fn ping(&self) -> Result<()>;

    /// Most recent persisted quote for `symbol` by `observed_at`.
    fn latest(&self, symbol: &str) -> Result<Option<PersistedQuote>>;

    /// Persisted quotes for `symbol` with `start <= observed_at <= end`,
    /// ordered by `observed_at` ascending.
    fn range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PersistedQuote>>;

    /// Total number of persisted rows.
    fn total_records(&self) -> Result<usize>;

    /// Distinct symbols with at least one persisted row, sorted.
    fn symbols(&self) -> Result<Vec<String>>;
}
