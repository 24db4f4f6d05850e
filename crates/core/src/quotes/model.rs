//! Quote domain models.
//!
//! - [`QuoteRecord`]: one observation as the pipeline carries it
//! - [`CacheKey`] / [`CacheEntry`] / [`StagedEntry`]: the staging log
//! - [`PersistedQuote`]: the durable row shape

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use finpipe_market_data::{normalize_symbol, Quote};

use crate::errors::ValidationError;

/// Widest symbol the durable store accepts (`quotes.symbol VARCHAR(16)`).
pub const MAX_SYMBOL_LEN: usize = 16;

/// Widest provider id the durable store accepts (`quotes.source VARCHAR(32)`).
pub const MAX_SOURCE_LEN: usize = 32;

// =============================================================================
// QuoteRecord
// =============================================================================

/// One market observation, as staged and persisted by the pipeline.
///
/// `(symbol, observed_at)` is the natural key. When two records share it,
/// the one with the later `fetched_at` wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub symbol: String,
    pub observed_at: DateTime<Utc>,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl QuoteRecord {
    /// Stamp a provider quote with the fetch time.
    ///
    /// Falls back to `fetched_at` when the provider did not report an
    /// observation time.
    pub fn from_provider(quote: Quote, fetched_at: DateTime<Utc>) -> Self {
        Self {
            symbol: normalize_symbol(&quote.symbol),
            observed_at: quote.observed_at.unwrap_or(fetched_at),
            price: quote.price,
            open: quote.open,
            high: quote.high,
            low: quote.low,
            previous_close: quote.previous_close,
            change: quote.change,
            change_percent: quote.change_percent,
            volume: quote.volume,
            source: quote.source,
            fetched_at,
        }
    }

    /// Natural dedup key.
    pub fn natural_key(&self) -> (&str, DateTime<Utc>) {
        (&self.symbol, self.observed_at)
    }

    /// Check the record invariants: normalized non-empty symbol, column
    /// widths and finite numeric fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_symbol(&self.symbol)?;
        if normalize_symbol(&self.symbol) != self.symbol {
            return Err(ValidationError::UnnormalizedSymbol(self.symbol.clone()));
        }
        if self.source.chars().count() > MAX_SOURCE_LEN {
            return Err(ValidationError::SourceTooLong {
                provider: self.source.clone(),
                max: MAX_SOURCE_LEN,
            });
        }

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
        for (field, value) in fields {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(ValidationError::NonFinite {
                    symbol: self.symbol.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

/// A symbol the durable store can hold: non-empty and at most
/// [`MAX_SYMBOL_LEN`] characters.
pub fn check_symbol(symbol: &str) -> Result<(), ValidationError> {
    if symbol.is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    if symbol.chars().count() > MAX_SYMBOL_LEN {
        return Err(ValidationError::SymbolTooLong {
            symbol: symbol.to_string(),
            max: MAX_SYMBOL_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Cache entries
// =============================================================================

/// Address of a staged record: `{SYMBOL}:{fetched_at_millis}:{uuid_v7}`.
///
/// The trailing id keeps two fetches of the same symbol in the same
/// millisecond from overwriting each other.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn generate(symbol: &str, fetched_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}:{}:{}",
            symbol,
            fetched_at.timestamp_millis(),
            Uuid::now_v7().simple()
        ))
    }

    /// Wrap a key read back from the cache without checking it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(symbol, fetched_at)`.
    pub fn parse(&self) -> Result<(&str, DateTime<Utc>), ValidationError> {
        let malformed = || ValidationError::MalformedKey(self.0.clone());

        let mut parts = self.0.rsplitn(3, ':');
        let _id = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let millis = parts
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let symbol = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let fetched_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(malformed)?;
        Ok((symbol, fetched_at))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A [`QuoteRecord`] staged for durability.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub record: QuoteRecord,
}

impl CacheEntry {
    pub fn new(record: QuoteRecord) -> Self {
        Self {
            key: CacheKey::generate(&record.symbol, record.fetched_at),
            record,
        }
    }

    /// Serialized form stored as the cache value.
    pub fn payload(&self) -> Result<String, ValidationError> {
        serde_json::to_string(&self.record).map_err(|e| ValidationError::MalformedPayload {
            key: self.key.to_string(),
            message: e.to_string(),
        })
    }

    /// Decode and validate a raw staged value.
    pub fn decode(staged: &StagedEntry) -> Result<Self, ValidationError> {
        let (key_symbol, _) = staged.key.parse()?;
        let record: QuoteRecord =
            serde_json::from_str(&staged.payload).map_err(|e| ValidationError::MalformedPayload {
                key: staged.key.to_string(),
                message: e.to_string(),
            })?;
        record.validate()?;
        if key_symbol != record.symbol {
            return Err(ValidationError::KeyMismatch {
                key: staged.key.to_string(),
                symbol: record.symbol,
            });
        }
        Ok(Self {
            key: staged.key.clone(),
            record,
        })
    }
}

/// A raw `(key, value)` pair as read from the cache, not yet decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct StagedEntry {
    pub key: CacheKey,
    pub payload: String,
}

impl StagedEntry {
    pub fn new(key: CacheKey, payload: impl Into<String>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }
}

// =============================================================================
// PersistedQuote
// =============================================================================

/// Durable row, unique on `(symbol, observed_at)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuote {
    pub symbol: String,
    pub observed_at: DateTime<Utc>,
    pub price: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub previous_close: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedQuote {
    pub fn from_record(record: &QuoteRecord, updated_at: DateTime<Utc>) -> Self {
        Self {
            symbol: record.symbol.clone(),
            observed_at: record.observed_at,
            price: record.price,
            open: record.open,
            high: record.high,
            low: record.low,
            previous_close: record.previous_close,
            change: record.change,
            change_percent: record.change_percent,
            volume: record.volume,
            source: record.source.clone(),
            fetched_at: record.fetched_at,
            updated_at,
        }
    }
}
