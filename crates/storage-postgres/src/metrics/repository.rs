use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

use super::model::{NewStockMetricsDB, StockMetricsDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::stock_metrics;
use finpipe_core::{Result, StockMetrics, StockMetricsStore};

pub struct PgStockMetricsStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl PgStockMetricsStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl StockMetricsStore for PgStockMetricsStore {
    async fn upsert_metrics(&self, rows: &[StockMetrics]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let rows: Vec<NewStockMetricsDB> = rows
            .iter()
            .map(|m| NewStockMetricsDB::from_metrics(m, now))
            .collect();

        self.writer
            .exec(move |conn: &mut PgConnection| -> Result<usize> {
                diesel::insert_into(stock_metrics::table)
                    .values(&rows)
                    .on_conflict((stock_metrics::symbol, stock_metrics::as_of))
                    .do_update()
                    .set((
                        stock_metrics::cagr_1y.eq(excluded(stock_metrics::cagr_1y)),
                        stock_metrics::cagr_3y.eq(excluded(stock_metrics::cagr_3y)),
                        stock_metrics::cagr_5y.eq(excluded(stock_metrics::cagr_5y)),
                        stock_metrics::volatility_1y.eq(excluded(stock_metrics::volatility_1y)),
                        stock_metrics::ma_50.eq(excluded(stock_metrics::ma_50)),
                        stock_metrics::ma_200.eq(excluded(stock_metrics::ma_200)),
                        stock_metrics::rsi_14.eq(excluded(stock_metrics::rsi_14)),
                        stock_metrics::sharpe_ratio_1y.eq(excluded(stock_metrics::sharpe_ratio_1y)),
                        stock_metrics::max_drawdown_1y
                            .eq(excluded(stock_metrics::max_drawdown_1y)),
                        stock_metrics::updated_at.eq(excluded(stock_metrics::updated_at)),
                    ))
                    .execute(conn)
                    .into_core()
            })
            .await
    }

    fn latest_metrics(&self, symbol: &str) -> Result<Option<StockMetrics>> {
        let mut conn = get_connection(&self.pool)?;
        let row = stock_metrics::table
            .filter(stock_metrics::symbol.eq(symbol))
            .order(stock_metrics::as_of.desc())
            .select(StockMetricsDB::as_select())
            .first(&mut conn)
            .optional()
            .into_core()?;
        Ok(row.map(StockMetrics::from))
    }
}
