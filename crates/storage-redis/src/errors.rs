//! Storage-specific error types for Redis operations.
//!
//! Redis failures are converted to [`Error::CacheUnavailable`] before they
//! leave this crate: the pipeline treats any cache command failure as an
//! unreachable cache.

use finpipe_core::errors::Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid Redis connection target: {0}")]
    InvalidTarget(String),

    #[error("Redis command failed: {0}")]
    CommandFailed(#[from] redis::RedisError),

    #[error("Unexpected Redis reply: {0}")]
    UnexpectedReply(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidTarget(e) => Error::InvalidConfigValue(e),
            other => Error::CacheUnavailable(other.to_string()),
        }
    }
}

/// Extension trait to convert Redis results to core results.
///
/// Orphan rules keep us from implementing `From<RedisError> for Error`, so
/// call sites use `.into_core()` instead.
pub trait IntoCore<T> {
    fn into_core(self) -> finpipe_core::Result<T>;
}

impl<T> IntoCore<T> for std::result::Result<T, redis::RedisError> {
    fn into_core(self) -> finpipe_core::Result<T> {
        self.map_err(|e| StorageError::from(e).into())
    }
}
