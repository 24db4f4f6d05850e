//! Finnhub market data provider implementation.
//!
//! Quotes come from the `/quote` endpoint. Finnhub free tier is limited to
//! 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::errors::MarketDataError;
use crate::models::{FetchOutcome, Quote};
use crate::provider::{MarketDataProvider, RateLimit};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = "FINNHUB";

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    c: Option<f64>,
    /// Change
    d: Option<f64>,
    /// Percent change
    dp: Option<f64>,
    /// High price of the day
    h: Option<f64>,
    /// Low price of the day
    l: Option<f64>,
    /// Open price of the day
    o: Option<f64>,
    /// Previous close price
    pc: Option<f64>,
    /// Timestamp (Unix)
    t: Option<i64>,
}

/// Error response from Finnhub
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

// ============================================================================
// FinnhubProvider
// ============================================================================

/// Finnhub market data provider.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limit: RateLimit,
}

impl FinnhubProvider {
    /// Create a new Finnhub provider with the given API key.
    pub fn new(api_key: String) -> Result<Self, MarketDataError> {
        Self::with_timeout(api_key, Duration::from_secs(30))
    }

    /// Create a provider whose HTTP client gives up after `timeout`.
    ///
    /// Fails if the HTTP client cannot be built (e.g. no TLS backend), rather
    /// than falling back to a client without the timeout.
    pub fn with_timeout(api_key: String, timeout: Duration) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Connection {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP client setup failed: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
            rate_limit: RateLimit::default(),
        })
    }

    /// Override the documented free-tier budget (paid plans allow more).
    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Point the provider at a different host (proxies, test doubles).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Make a GET request to the Finnhub API.
    async fn fetch(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        let url = format!("{}{}", self.base_url, endpoint);

        debug!("Finnhub request: {} with {} params", endpoint, params.len());

        let response = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(|e| MarketDataError::from_transport(PROVIDER_ID, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .text()
            .await
            .map_err(|e| MarketDataError::from_transport(PROVIDER_ID, e))
    }
}

/// Map a non-success HTTP status to a classified error.
fn classify_status(status: StatusCode, body: &str) -> MarketDataError {
    let provider = PROVIDER_ID.to_string();

    match status {
        StatusCode::TOO_MANY_REQUESTS => MarketDataError::RateLimited { provider },
        StatusCode::UNAUTHORIZED => MarketDataError::Unauthorized { provider },
        // Finnhub answers 403 once the plan quota is exhausted
        StatusCode::FORBIDDEN => MarketDataError::RateLimited { provider },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            MarketDataError::Timeout { provider }
        }
        s if s.is_server_error() => MarketDataError::ServerError {
            provider,
            status: s.as_u16(),
        },
        s => {
            let message = serde_json::from_str::<ErrorResponse>(body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| format!("HTTP {} - {}", s, body));
            MarketDataError::ProviderError { provider, message }
        }
    }
}

/// Turn a `/quote` body into a quote, a typed "no data", or a failure.
fn parse_quote_response(symbol: &str, body: &str) -> Result<FetchOutcome, MarketDataError> {
    let response: QuoteResponse =
        serde_json::from_str(body).map_err(|e| MarketDataError::MalformedResponse {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to parse quote response: {}", e),
        })?;

    let close = response.c.unwrap_or(0.0);
    let numeric = [response.o, response.h, response.l, response.pc];
    let all_zero = close == 0.0
        && numeric.iter().all(|v| v.unwrap_or(0.0) == 0.0)
        && response.t.unwrap_or(0) == 0;

    // Finnhub returns an all-zero payload with null change fields instead of a 404
    if all_zero && response.d.is_none() && response.dp.is_none() {
        return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
    }

    if close == 0.0 {
        return Ok(FetchOutcome::NoData);
    }

    let observed_at = response
        .t
        .filter(|ts| *ts > 0)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

    let mut quote = Quote::new(symbol, observed_at, close, PROVIDER_ID);
    quote.open = response.o.filter(|v| *v != 0.0);
    quote.high = response.h.filter(|v| *v != 0.0);
    quote.low = response.l.filter(|v| *v != 0.0);
    quote.previous_close = response.pc.filter(|v| *v != 0.0);
    quote.change = response.d;
    quote.change_percent = response.dp;

    if let Some(field) = quote.first_non_finite_field() {
        return Err(MarketDataError::ValidationFailed {
            message: format!("{} has a non-finite {}", symbol, field),
        });
    }

    Ok(FetchOutcome::Quote(quote))
}

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit.clone()
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<FetchOutcome, MarketDataError> {
        let text = self.fetch("/quote", &[("symbol", symbol)]).await?;
        let outcome = parse_quote_response(symbol, &text)?;

        if outcome == FetchOutcome::NoData {
            debug!("Finnhub: no quote data for {}", symbol);
        }

        Ok(outcome)
    }
}
