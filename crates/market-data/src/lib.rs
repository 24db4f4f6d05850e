//! Finpipe Market Data Crate
//!
//! This crate provides the provider side of the ingestion pipeline: a typed
//! client around external quote APIs with request pacing, failure
//! classification and bounded retries.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |  ProviderClient  |  (pacing + retry + timeout)
//! +------------------+
//!          |
//!          v
//! +------------------+     +------------------+
//! |   RateLimiter    |     |   RetryPolicy    |
//! +------------------+     +------------------+
//!          |
//!          v
//! +------------------+
//! |    Provider      |  (Finnhub, ...)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |     Quote        |  (or NoData)
//! +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`Quote`] - A single provider observation
//! - [`FetchOutcome`] - A quote, or the typed "no data available" result
//! - [`MarketDataError`] - Failures, classified by [`RetryClass`]
//! - [`ProviderClient`] - The facade the fetch scheduler calls

pub mod client;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use client::{ProviderClient, ProviderClientConfig};
pub use errors::{MarketDataError, RetryClass, RetryPolicy};
pub use models::{normalize_symbol, FetchOutcome, Quote};
pub use provider::finnhub::FinnhubProvider;
pub use provider::{MarketDataProvider, RateLimit};
pub use registry::{RateLimitConfig, RateLimiter};
