//! Core error types for the ingestion pipeline.
//!
//! This module defines storage-agnostic error types. Driver errors (Redis,
//! Diesel, r2d2) are converted to these types by the storage crates.

use thiserror::Error;

use finpipe_market_data::{MarketDataError, RetryClass};

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Timeout, rate limiting, 5xx or a dropped connection at the provider.
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Unknown symbol, malformed response or auth failure at the provider.
    #[error("Permanent provider error: {0}")]
    PermanentProvider(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Durable store unavailable: {0}")]
    DurableStoreUnavailable(#[from] DatabaseError),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Whether a durable batch write that failed with this error is worth
    /// another attempt.
    pub fn is_retryable_store_error(&self) -> bool {
        matches!(self, Error::DurableStoreUnavailable(_))
    }
}

impl From<MarketDataError> for Error {
    fn from(error: MarketDataError) -> Self {
        match error.retry_class() {
            RetryClass::Transient => Error::TransientProvider(error.to_string()),
            RetryClass::Permanent => Error::PermanentProvider(error.to_string()),
        }
    }
}

impl From<prometheus::Error> for Error {
    fn from(error: prometheus::Error) -> Self {
        Error::Unexpected(format!("metrics registry: {}", error))
    }
}

/// Storage-agnostic error type for durable store operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

/// A staged record that cannot be persisted as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("symbol is empty")]
    EmptySymbol,

    #[error("symbol '{symbol}' is longer than {max} characters")]
    SymbolTooLong { symbol: String, max: usize },

    #[error("provider id '{provider}' is longer than {max} characters")]
    SourceTooLong { provider: String, max: usize },

    #[error("symbol '{0}' is not uppercase-normalized")]
    UnnormalizedSymbol(String),

    #[error("{symbol}: field '{field}' is not finite")]
    NonFinite { symbol: String, field: &'static str },

    #[error("cache key '{0}' is malformed")]
    MalformedKey(String),

    #[error("cache key '{key}' does not match record symbol '{symbol}'")]
    KeyMismatch { key: String, symbol: String },

    #[error("payload for '{key}' could not be decoded: {message}")]
    MalformedPayload { key: String, message: String },
}
