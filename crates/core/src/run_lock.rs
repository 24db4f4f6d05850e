//! Exclusive per-job run lock.
//!
//! A job that cannot acquire its lock is skipped, not queued. The lock is
//! released on every exit path of [`run_exclusive`], panics included.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use log::{debug, warn};
use uuid::Uuid;

use crate::errors::Result;

/// Which job a lock guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Fetch,
    Transfer,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Fetch => "fetch",
            JobKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of ownership handed out by [`RunLock::try_acquire`]. Release only
/// succeeds with the token that acquired the lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken {
    pub job: JobKind,
    pub value: String,
}

impl LockToken {
    pub fn new(job: JobKind) -> Self {
        Self {
            job,
            value: Uuid::now_v7().to_string(),
        }
    }
}

#[async_trait]
pub trait RunLock: Send + Sync {
    /// `Ok(None)` when another holder has the lock.
    async fn try_acquire(&self, job: JobKind) -> Result<Option<LockToken>>;

    async fn release(&self, token: LockToken) -> Result<()>;
}

/// Result of invoking a job under its run lock.
#[derive(Debug)]
pub enum Invocation<T> {
    Completed(T),
    /// The lock was held by another invocation.
    Skipped,
}

impl<T> Invocation<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Invocation::Completed(value) => Some(value),
            Invocation::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Invocation::Skipped)
    }
}

/// Run `job` while holding the lock for `kind`.
///
/// Errors from acquisition are returned as-is; a release failure is logged
/// and otherwise ignored, since lock TTLs bound how long it can linger.
pub async fn run_exclusive<T, F>(lock: &dyn RunLock, kind: JobKind, job: F) -> Result<Invocation<T>>
where
    F: Future<Output = T> + Send,
{
    let token = match lock.try_acquire(kind).await? {
        Some(token) => token,
        None => {
            debug!("Skipping {} - already in progress", kind);
            return Ok(Invocation::Skipped);
        }
    };

    let outcome = AssertUnwindSafe(job).catch_unwind().await;

    if let Err(e) = lock.release(token).await {
        warn!("Failed to release {} run lock: {}", kind, e);
    }

    match outcome {
        Ok(value) => Ok(Invocation::Completed(value)),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// In-process run lock.
#[derive(Default)]
pub struct LocalRunLock {
    held: Mutex<HashSet<JobKind>>,
}

impl LocalRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, job: JobKind) -> bool {
        self.lock().contains(&job)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobKind>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(&self, job: JobKind) -> Result<Option<LockToken>> {
        if self.lock().insert(job) {
            Ok(Some(LockToken::new(job)))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        self.lock().remove(&token.job);
        Ok(())
    }
}
