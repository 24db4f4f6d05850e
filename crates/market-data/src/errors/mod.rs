//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all provider operations
//! - [`RetryClass`]: Classification for determining retry behavior
//! - [`RetryPolicy`]: Bounded, jittered exponential backoff

mod retry;

pub use retry::{RetryClass, RetryPolicy};

use thiserror::Error;

/// Errors that can occur while fetching from a market data provider.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines whether the
/// provider client spends more of its retry budget on the symbol.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The requested symbol is unknown to the provider.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The provider rejected our credentials (HTTP 401).
    #[error("Unauthorized: {provider}")]
    Unauthorized {
        /// The provider that rejected the request
        provider: String,
    },

    /// The provider rate limited the request (HTTP 429, or quota exhausted).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The request to the provider timed out.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The provider answered with a server-side failure (HTTP 5xx).
    #[error("Server error: {provider} - HTTP {status}")]
    ServerError {
        /// The provider that failed
        provider: String,
        /// HTTP status code
        status: u16,
    },

    /// The connection failed or was reset before a response arrived.
    #[error("Connection error: {provider} - {message}")]
    Connection {
        /// The provider we tried to reach
        provider: String,
        /// Underlying transport message
        message: String,
    },

    /// The provider answered, but the request itself was rejected (other 4xx).
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error
        provider: String,
        /// The error message from the provider
        message: String,
    },

    /// The response body could not be understood.
    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse {
        /// The provider that sent the response
        provider: String,
        /// Parse failure details
        message: String,
    },

    /// Data validation failed (non-finite prices, bad timestamps).
    #[error("Validation failed: {message}")]
    ValidationFailed {
        /// Description of the validation failure
        message: String,
    },
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Transient`]: timeouts, rate limiting, 5xx and broken
    ///   connections. Worth another attempt after a backoff.
    /// - [`RetryClass::Permanent`]: unknown symbols, auth failures, malformed
    ///   payloads. Retrying without intervention cannot help.
    ///
    /// # Examples
    ///
    /// ```
    /// use finpipe_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "FINNHUB".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Transient);
    ///
    /// let error = MarketDataError::SymbolNotFound("INVALID".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Permanent);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::Connection { .. } => RetryClass::Transient,

            Self::SymbolNotFound(_)
            | Self::Unauthorized { .. }
            | Self::ProviderError { .. }
            | Self::MalformedResponse { .. }
            | Self::ValidationFailed { .. } => RetryClass::Permanent,
        }
    }

    /// Shorthand for `retry_class() == RetryClass::Transient`.
    pub fn is_transient(&self) -> bool {
        self.retry_class() == RetryClass::Transient
    }

    /// Classify a transport-level `reqwest` failure.
    pub fn from_transport(provider: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                provider: provider.to_string(),
            }
        } else if error.is_decode() {
            Self::MalformedResponse {
                provider: provider.to_string(),
                message: error.to_string(),
            }
        } else {
            Self::Connection {
                provider: provider.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_not_found_is_permanent() {
        let error = MarketDataError::SymbolNotFound("INVALID".to_string());
        assert_eq!(error.retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn test_unauthorized_is_permanent() {
        let error = MarketDataError::Unauthorized {
            provider: "FINNHUB".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn test_malformed_response_is_permanent() {
        let error = MarketDataError::MalformedResponse {
            provider: "FINNHUB".to_string(),
            message: "expected value at line 1".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Permanent);
    }

    #[test]
    fn test_rate_limited_is_transient() {
        let error = MarketDataError::RateLimited {
            provider: "FINNHUB".to_string(),
        };
        assert!(error.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = MarketDataError::Timeout {
            provider: "FINNHUB".to_string(),
        };
        assert!(error.is_transient());
    }

    #[test]
    fn test_server_error_is_transient() {
        let error = MarketDataError::ServerError {
            provider: "FINNHUB".to_string(),
            status: 503,
        };
        assert_eq!(error.retry_class(), RetryClass::Transient);
    }

    #[test]
    fn test_connection_reset_is_transient() {
        let error = MarketDataError::Connection {
            provider: "FINNHUB".to_string(),
            message: "connection reset by peer".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Transient);
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::SymbolNotFound("INVALID".to_string());
        assert_eq!(format!("{}", error), "Symbol not found: INVALID");

        let error = MarketDataError::ServerError {
            provider: "FINNHUB".to_string(),
            status: 502,
        };
        assert_eq!(format!("{}", error), "Server error: FINNHUB - HTTP 502");
    }
}
