//! Market data provider trait definitions.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::FetchOutcome;

use super::capabilities::RateLimit;

/// Trait for market data providers.
///
/// Implement this trait to add support for a new market data source.
/// An implementation performs a single request and classifies what came
/// back; it must not retry or sleep on its own.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "FINNHUB".
    /// Used for logging, rate limiter buckets and the quote `source` field.
    fn id(&self) -> &'static str;

    /// Rate limits that should be applied when calling this provider.
    fn rate_limit(&self) -> RateLimit;

    /// Fetch the latest quote for an uppercase-normalized symbol.
    ///
    /// Returns [`FetchOutcome::NoData`] when the provider knows the symbol
    /// but has nothing to report, and a `MarketDataError` on failure.
    async fn get_latest_quote(&self, symbol: &str) -> Result<FetchOutcome, MarketDataError>;
}
