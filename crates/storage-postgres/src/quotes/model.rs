//! Database models for persisted quotes.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use finpipe_core::quotes::{PersistedQuote, QuoteRecord};

/// Row as read from `quotes`.
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::quotes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QuoteDB {
    pub id: i64,
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

/// Row as written to `quotes`.
#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::quotes)]
pub struct NewQuoteDB {
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

impl NewQuoteDB {
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

impl From<QuoteDB> for PersistedQuote {
    fn from(row: QuoteDB) -> Self {
        Self {
            symbol: row.symbol,
            observed_at: row.observed_at,
            price: row.price,
            open: row.open,
            high: row.high,
            low: row.low,
            previous_close: row.previous_close,
            change: row.change,
            change_percent: row.change_percent,
            volume: row.volume,
            source: row.source,
            fetched_at: row.fetched_at,
            updated_at: row.updated_at,
        }
    }
}
