use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use finpipe_core::StockMetrics;

#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::stock_metrics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StockMetricsDB {
    pub id: i64,
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
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::stock_metrics)]
pub struct NewStockMetricsDB {
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
    pub updated_at: DateTime<Utc>,
}

impl NewStockMetricsDB {
    pub fn from_metrics(m: &StockMetrics, updated_at: DateTime<Utc>) -> Self {
        Self {
            symbol: m.symbol.clone(),
            as_of: m.as_of,
            cagr_1y: m.cagr_1y,
            cagr_3y: m.cagr_3y,
            cagr_5y: m.cagr_5y,
            volatility_1y: m.volatility_1y,
            ma_50: m.ma_50,
            ma_200: m.ma_200,
            rsi_14: m.rsi_14,
            sharpe_ratio_1y: m.sharpe_ratio_1y,
            max_drawdown_1y: m.max_drawdown_1y,
            updated_at,
        }
    }
}

impl From<StockMetricsDB> for StockMetrics {
    fn from(row: StockMetricsDB) -> Self {
        Self {
            symbol: row.symbol,
            as_of: row.as_of,
            cagr_1y: row.cagr_1y,
            cagr_3y: row.cagr_3y,
            cagr_5y: row.cagr_5y,
            volatility_1y: row.volatility_1y,
            ma_50: row.ma_50,
            ma_200: row.ma_200,
            rsi_14: row.rsi_14,
            sharpe_ratio_1y: row.sharpe_ratio_1y,
            max_drawdown_1y: row.max_drawdown_1y,
        }
    }
}
