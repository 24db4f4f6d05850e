//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all providers implement
//! - Provider rate limiting configuration
//! - Concrete provider implementations (Finnhub)
//!
//! Providers perform exactly one request per call. Pacing, retries and
//! timeouts are applied around them by [`ProviderClient`](crate::ProviderClient).

mod capabilities;
mod traits;

pub mod finnhub;

// Re-exports
pub use capabilities::RateLimit;
pub use traits::MarketDataProvider;
