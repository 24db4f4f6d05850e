//! Redis-backed [`CacheStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use finpipe_core::cache::CacheStore;
use finpipe_core::quotes::{CacheEntry, CacheKey, StagedEntry};
use finpipe_core::Result;

use crate::errors::IntoCore;
use crate::keys::KeySpace;

/// Staging area kept in a single Redis hash.
///
/// `HGETALL` gives the Transfer Job an atomic snapshot; quarantine moves
/// entries inside a `MULTI` block.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    keys: KeySpace,
}

impl RedisCacheStore {
    pub fn new(conn: ConnectionManager, keys: KeySpace) -> Self {
        Self { conn, keys }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.into_core()?;
        Ok(())
    }

    async fn insert(&self, entry: &CacheEntry) -> Result<()> {
        let payload = entry.payload()?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(self.keys.staged(), entry.key.as_str(), payload)
            .await
            .into_core()?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<StagedEntry>> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> =
            conn.hgetall(self.keys.staged()).await.into_core()?;

        let mut entries: Vec<StagedEntry> = raw
            .into_iter()
            .map(|(key, payload)| StagedEntry::new(CacheKey::from_raw(key), payload))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Snapshot of {} staged entries", entries.len());
        Ok(entries)
    }

    async fn remove(&self, keys: &[CacheKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let fields: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        let mut conn = self.conn.clone();
        let removed: usize = conn.hdel(self.keys.staged(), fields).await.into_core()?;
        Ok(removed)
    }

    async fn quarantine(&self, entries: &[StagedEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let pairs: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.key.as_str(), e.payload.as_str()))
            .collect();
        let fields: Vec<&str> = pairs.iter().map(|(key, _)| *key).collect();

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(self.keys.quarantine(), &pairs)
            .ignore()
            .hdel(self.keys.staged(), fields)
            .ignore()
            .query_async(&mut conn)
            .await
            .into_core()?;
        Ok(entries.len())
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.hlen(self.keys.staged()).await.into_core()?;
        Ok(len)
    }
}
