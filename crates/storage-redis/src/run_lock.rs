//! Redis run lock, shared by every process pointed at the same Redis.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use redis::aio::ConnectionManager;

use finpipe_core::{JobKind, Result, RunLock};
use finpipe_core::run_lock::LockToken;

use crate::errors::IntoCore;
use crate::keys::KeySpace;

/// Deletes the lock only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// `SET NX PX` lock with token-checked release.
///
/// The TTL bounds how long a crashed holder can block the job.
#[derive(Clone)]
pub struct RedisRunLock {
    conn: ConnectionManager,
    keys: KeySpace,
    ttl: Duration,
}

impl RedisRunLock {
    pub fn new(conn: ConnectionManager, keys: KeySpace, ttl: Duration) -> Self {
        Self { conn, keys, ttl }
    }
}

#[async_trait]
impl RunLock for RedisRunLock {
    async fn try_acquire(&self, job: JobKind) -> Result<Option<LockToken>> {
        let token = LockToken::new(job);
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.lock(job))
            .arg(&token.value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .into_core()?;

        match reply {
            Some(_) => {
                debug!("Acquired {} run lock", job);
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.keys.lock(token.job))
            .arg(&token.value)
            .invoke_async(&mut conn)
            .await
            .into_core()?;
        if deleted == 0 {
            warn!(
                "{} run lock expired or was taken over before release",
                token.job
            );
        }
        Ok(())
    }
}
