use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation as reported by a provider.
///
/// `observed_at` is whatever the provider claims; it is `None` when the
/// provider reports no timestamp, and the pipeline substitutes fetch time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Uppercase-normalized symbol
    pub symbol: String,

    /// Provider-reported observation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,

    /// Current / last trade price (required)
    pub price: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<f64>,

    /// Absolute change against previous close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,

    /// Percent change against previous close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,

    /// Source of the quote (FINNHUB, ...)
    pub source: String,
}

impl Quote {
    /// Create a quote with only the required fields.
    pub fn new(symbol: &str, observed_at: Option<DateTime<Utc>>, price: f64, source: &str) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            observed_at,
            price,
            open: None,
            high: None,
            low: None,
            previous_close: None,
            change: None,
            change_percent: None,
            volume: None,
            source: source.to_string(),
        }
    }

    /// Returns the name of the first numeric field that is NaN or infinite.
    pub fn first_non_finite_field(&self) -> Option<&'static str> {
        let fields = [
            ("price", Some(self.price)),
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("previous_close", self.previous_close),
            ("change", self.change),
            ("change_percent", self.change_percent),
            ("volume", self.volume),
        ];
        fields
            .into_iter()
            .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
            .map(|(name, _)| name)
    }
}

/// Result of a successful provider round-trip.
///
/// "The provider has nothing for this symbol right now" is a business outcome,
/// not a failure, so it is kept out of [`MarketDataError`](crate::MarketDataError).
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    Quote(Quote),
    NoData,
}

impl FetchOutcome {
    pub fn into_quote(self) -> Option<Quote> {
        match self {
            FetchOutcome::Quote(quote) => Some(quote),
            FetchOutcome::NoData => None,
        }
    }
}

/// Trim and uppercase a ticker symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
