//! Derived per-symbol indicators, recomputed after each transfer.

pub mod indicators;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::quotes::{PersistedQuote, QuoteStore};

use indicators::{tail, TRADING_DAYS};

/// Calendar lookback used to load history.
const HISTORY_DAYS: i64 = 5 * 365;

/// One `(symbol, as_of)` row of derived indicators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMetrics {
    pub symbol: String,
    pub as_of: NaiveDate,
    pub cagr_1y: Option<f64>,
    pub cagr_3y: Option<f64>,
    pub cagr_5y: Option<f64>,
    pub volatility_1y: Option<f64>,
    pub ma_50: Option<f64>,
    pub ma_200: Option<f64>,
    pub rsi_14: Option<f64>,
    pub sharpe_ratio_1y: Option<f64>,
    pub max_drawdown_1y: Option<f64>,
}

impl StockMetrics {
    /// Compute from daily closes, oldest first. `None` below two closes.
    pub fn compute(symbol: &str, as_of: NaiveDate, closes: &[f64]) -> Option<Self> {
        if closes.len() < 2 {
            return None;
        }
        let year = tail(closes, TRADING_DAYS);
        Some(Self {
            symbol: symbol.to_string(),
            as_of,
            cagr_1y: indicators::cagr(year),
            cagr_3y: indicators::cagr(tail(closes, 3 * TRADING_DAYS)),
            cagr_5y: indicators::cagr(closes),
            volatility_1y: indicators::volatility(year),
            ma_50: indicators::moving_average(closes, 50),
            ma_200: indicators::moving_average(closes, 200),
            rsi_14: indicators::rsi(closes, 14),
            sharpe_ratio_1y: indicators::sharpe_ratio(year),
            max_drawdown_1y: indicators::max_drawdown(year),
        })
    }
}

/// Storage for [`StockMetrics`], unique on `(symbol, as_of)`.
#[async_trait]
pub trait StockMetricsStore: Send + Sync {
    /// Upsert rows in one transaction.
    async fn upsert_metrics(&self, rows: &[StockMetrics]) -> Result<usize>;

    fn latest_metrics(&self, symbol: &str) -> Result<Option<StockMetrics>>;
}

/// Last close of each UTC day, oldest first. Non-positive prices are dropped.
pub fn daily_closes(rows: &[PersistedQuote]) -> Vec<f64> {
    let mut by_day: BTreeMap<NaiveDate, &PersistedQuote> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.price > 0.0) {
        let day = row.observed_at.date_naive();
        by_day
            .entry(day)
            .and_modify(|current| {
                if row.observed_at >= current.observed_at {
                    *current = row;
                }
            })
            .or_insert(row);
    }
    by_day.values().map(|row| row.price).collect()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub updated: usize,
    /// Symbols with fewer than two daily closes.
    pub insufficient: usize,
    pub failed: usize,
}

pub struct AnalyticsJob {
    quotes: Arc<dyn QuoteStore>,
    store: Arc<dyn StockMetricsStore>,
}

impl AnalyticsJob {
    pub fn new(quotes: Arc<dyn QuoteStore>, store: Arc<dyn StockMetricsStore>) -> Self {
        Self { quotes, store }
    }

    /// Recompute metrics for `symbols` as of `as_of`. Per-symbol failures are
    /// logged and counted, never propagated.
    pub async fn recompute(&self, symbols: &[String], as_of: NaiveDate) -> AnalyticsSummary {
        let mut summary = AnalyticsSummary::default();
        let mut rows = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            match self.compute_symbol(symbol, as_of) {
                Ok(Some(metrics)) => rows.push(metrics),
                Ok(None) => {
                    debug!("Insufficient history for {} metrics", symbol);
                    summary.insufficient += 1;
                }
                Err(e) => {
                    warn!("Failed to load history for {}: {}", symbol, e);
                    summary.failed += 1;
                }
            }
        }

        if rows.is_empty() {
            return summary;
        }
        match self.store.upsert_metrics(&rows).await {
            Ok(n) => {
                info!("Stock metrics updated for {} symbols", n);
                summary.updated = n;
            }
            Err(e) => {
                warn!("Failed to store stock metrics: {}", e);
                summary.failed += rows.len();
            }
        }
        summary
    }

    fn compute_symbol(&self, symbol: &str, as_of: NaiveDate) -> Result<Option<StockMetrics>> {
        let end = Utc.from_utc_datetime(&as_of.and_time(NaiveTime::MIN)) + Duration::days(1);
        let start = end - Duration::days(HISTORY_DAYS);
        let history = self.quotes.range(symbol, start, end)?;
        Ok(StockMetrics::compute(symbol, as_of, &daily_closes(&history)))
    }
}
