//! Cache Store contract: the staging area between fetch and transfer.
//!
//! The Fetch Scheduler only inserts; the Transfer Job only reads snapshots,
//! quarantines, and removes the keys it committed. Entries never expire.

#[cfg(any(test, feature = "test-utils"))]
mod memory;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryCacheStore;

use async_trait::async_trait;

use crate::errors::Result;
use crate::quotes::{CacheEntry, CacheKey, StagedEntry};

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reachability check. Fails with [`crate::Error::CacheUnavailable`].
    async fn ping(&self) -> Result<()>;

    /// Stage one entry under its key.
    async fn insert(&self, entry: &CacheEntry) -> Result<()>;

    /// Every staged entry, read atomically. Values are not decoded.
    async fn snapshot(&self) -> Result<Vec<StagedEntry>>;

    /// Delete exactly these keys. Returns how many existed.
    async fn remove(&self, keys: &[CacheKey]) -> Result<usize>;

    /// Move entries out of the staging area into quarantine.
    async fn quarantine(&self, entries: &[StagedEntry]) -> Result<usize>;

    /// Number of staged entries.
    async fn len(&self) -> Result<usize>;
}
