use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::CacheStore;
use crate::errors::{Error, Result};
use crate::quotes::{CacheEntry, CacheKey, StagedEntry};

#[derive(Default)]
struct Areas {
    staged: BTreeMap<CacheKey, String>,
    quarantine: BTreeMap<CacheKey, String>,
}

/// Process-local [`CacheStore`] for tests and dry runs.
///
/// `set_available(false)` makes every call fail as an unreachable cache;
/// `fail_inserts_after(n)` lets `n` more inserts through, then fails the rest.
/// `set_insert_delay` makes each insert take that long before it lands.
pub struct InMemoryCacheStore {
    areas: Mutex<Areas>,
    available: AtomicBool,
    inserts_left: AtomicUsize,
    insert_delay_ms: AtomicU64,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self {
            areas: Mutex::new(Areas::default()),
            available: AtomicBool::new(true),
            inserts_left: AtomicUsize::new(usize::MAX),
            insert_delay_ms: AtomicU64::new(0),
        }
    }
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_inserts_after(&self, n: usize) {
        self.inserts_left.store(n, Ordering::SeqCst);
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        self.insert_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Stage a raw value, bypassing encoding. Lets tests plant corrupt data.
    pub fn insert_raw(&self, key: CacheKey, payload: impl Into<String>) {
        self.lock().staged.insert(key, payload.into());
    }

    /// Copy of the staged area, decoded where possible.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.lock()
            .staged
            .iter()
            .filter_map(|(key, payload)| {
                CacheEntry::decode(&StagedEntry::new(key.clone(), payload.as_str())).ok()
            })
            .collect()
    }

    pub fn quarantined_keys(&self) -> Vec<CacheKey> {
        self.lock().quarantine.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Areas> {
        self.areas.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::CacheUnavailable("in-memory cache disabled".to_string()))
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn insert(&self, entry: &CacheEntry) -> Result<()> {
        self.check_available()?;
        if self
            .inserts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(Error::CacheUnavailable("write rejected".to_string()));
        }
        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let payload = entry.payload()?;
        self.lock().staged.insert(entry.key.clone(), payload);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<StagedEntry>> {
        self.check_available()?;
        Ok(self
            .lock()
            .staged
            .iter()
            .map(|(key, payload)| StagedEntry::new(key.clone(), payload.as_str()))
            .collect())
    }

    async fn remove(&self, keys: &[CacheKey]) -> Result<usize> {
        self.check_available()?;
        let mut areas = self.lock();
        Ok(keys
            .iter()
            .filter(|key| areas.staged.remove(*key).is_some())
            .count())
    }

    async fn quarantine(&self, entries: &[StagedEntry]) -> Result<usize> {
        self.check_available()?;
        let mut areas = self.lock();
        for entry in entries {
            areas.staged.remove(&entry.key);
            areas
                .quarantine
                .insert(entry.key.clone(), entry.payload.clone());
        }
        Ok(entries.len())
    }

    async fn len(&self) -> Result<usize> {
        self.check_available()?;
        Ok(self.lock().staged.len())
    }
}
