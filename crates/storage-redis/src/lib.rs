//! Redis storage for finpipe.
//!
//! Implements the core [`finpipe_core::CacheStore`] and
//! [`finpipe_core::RunLock`] traits on a shared tokio `ConnectionManager`,
//! plus the [`finpipe_core::ReportQueue`] that carries one-shot cycle
//! reports to the serving process.

pub mod cache;
pub mod errors;
pub mod keys;
pub mod reports;
pub mod run_lock;

pub use cache::RedisCacheStore;
pub use errors::StorageError;
pub use keys::KeySpace;
pub use reports::RedisReportQueue;
pub use run_lock::RedisRunLock;

use log::info;
use redis::aio::ConnectionManager;

/// Connection URL for a Redis host and port.
pub fn redis_url(host: &str, port: u16) -> std::result::Result<String, StorageError> {
    if host.trim().is_empty() {
        return Err(StorageError::InvalidTarget("Redis host is empty".to_string()));
    }
    if port == 0 {
        return Err(StorageError::InvalidTarget("Redis port is 0".to_string()));
    }
    Ok(format!("redis://{}:{}/", host.trim(), port))
}

/// Open a managed connection. The manager reconnects on its own after
/// connection loss.
pub async fn connect(host: &str, port: u16) -> finpipe_core::Result<ConnectionManager> {
    let url = redis_url(host, port)?;
    let client = redis::Client::open(url.as_str()).map_err(StorageError::from)?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(StorageError::from)?;
    info!("Connected to Redis at {}:{}", host, port);
    Ok(conn)
}
