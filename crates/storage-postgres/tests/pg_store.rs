//! Durable store tests against a live PostgreSQL.
//!
//! Skipped unless `TEST_POSTGRES_DB` is set. Host, port, user and password
//! come from `TEST_POSTGRES_HOST`, `TEST_POSTGRES_PORT`, `TEST_POSTGRES_USER`
//! and `TEST_POSTGRES_PASSWORD`. Each test writes under its own symbol and
//! deletes it afterwards.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use diesel::prelude::*;

use finpipe_core::quotes::QuoteRecord;
use finpipe_core::{QuoteStore, StockMetrics, StockMetricsStore};
use finpipe_storage_postgres::schema::{quotes, stock_metrics};
use finpipe_storage_postgres::{
    create_pool, run_migrations, spawn_writer, DbPool, PgQuoteStore, PgStockMetricsStore,
    PostgresTarget,
};

fn target_from_env() -> Option<PostgresTarget> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    let database = var("TEST_POSTGRES_DB")?;
    Some(PostgresTarget {
        host: var("TEST_POSTGRES_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
        port: var("TEST_POSTGRES_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432),
        database,
        user: var("TEST_POSTGRES_USER").unwrap_or_else(|| "postgres".to_string()),
        password: var("TEST_POSTGRES_PASSWORD").unwrap_or_default(),
    })
}

/// Pool on a migrated database, or `None` when no database is configured.
fn migrated_pool() -> Option<Arc<DbPool>> {
    let Some(target) = target_from_env() else {
        eprintln!("TEST_POSTGRES_DB not set, skipping");
        return None;
    };
    let pool = create_pool(&target, 2).unwrap();
    run_migrations(&pool).unwrap();
    Some(pool)
}

/// Symbol no other run will use. Fits the 16-character column.
fn unique_symbol(tag: &str) -> String {
    let millis = Utc::now().timestamp_millis() % 1_000_000_000;
    format!("{}{}", tag, millis)
}

fn record(symbol: &str, second: i64, price: f64) -> QuoteRecord {
    QuoteRecord {
        symbol: symbol.to_string(),
        observed_at: Utc.timestamp_opt(1_700_000_000 + second, 0).unwrap(),
        price,
        open: Some(price - 1.0),
        high: None,
        low: None,
        previous_close: Some(price - 0.5),
        change: None,
        change_percent: None,
        volume: None,
        source: "FINNHUB".to_string(),
        fetched_at: Utc.timestamp_opt(1_700_000_000 + second + 5, 0).unwrap(),
    }
}

fn cleanup(pool: &DbPool, symbol: &str) {
    let mut conn = pool.get().unwrap();
    diesel::delete(quotes::table.filter(quotes::symbol.eq(symbol)))
        .execute(&mut conn)
        .unwrap();
    diesel::delete(stock_metrics::table.filter(stock_metrics::symbol.eq(symbol)))
        .execute(&mut conn)
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_late_chunk_rolls_back_the_whole_batch() {
    let Some(pool) = migrated_pool() else {
        return;
    };
    let store = PgQuoteStore::new(pool.clone(), spawn_writer(pool.clone()));
    let symbol = unique_symbol("RB");

    // The first 1000 rows fill one INSERT; the last row overflows symbol
    // VARCHAR(16) in the second
    let mut batch: Vec<QuoteRecord> = (0..1000).map(|i| record(&symbol, i, 10.0)).collect();
    batch.push(record("COINBASE:BTC-USDT", 0, 60_000.0));

    let result = store.upsert_batch(&batch).await;
    assert!(result.is_err());

    let start = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
    let end = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
    assert!(store.range(&symbol, start, end).unwrap().is_empty());
    assert!(store.latest("COINBASE:BTC-USDT").unwrap().is_none());

    cleanup(&pool, &symbol);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_upsert_leaves_rows_unchanged() {
    let Some(pool) = migrated_pool() else {
        return;
    };
    let store = PgQuoteStore::new(pool.clone(), spawn_writer(pool.clone()));
    let symbol = unique_symbol("RP");
    let batch = vec![
        record(&symbol, 0, 101.5),
        record(&symbol, 60, 102.25),
        record(&symbol, 120, 99.75),
    ];

    assert_eq!(store.upsert_batch(&batch).await.unwrap(), 3);
    let start = Utc.timestamp_opt(1_600_000_000, 0).unwrap();
    let end = Utc.timestamp_opt(1_800_000_000, 0).unwrap();
    let first = store.range(&symbol, start, end).unwrap();

    assert_eq!(store.upsert_batch(&batch).await.unwrap(), 3);
    let second = store.range(&symbol, start, end).unwrap();

    assert_eq!(second.len(), 3);
    let prices: Vec<f64> = second.iter().map(|q| q.price).collect();
    assert_eq!(prices, vec![101.5, 102.25, 99.75]);
    for (before, after) in first.iter().zip(&second) {
        assert_eq!(before.observed_at, after.observed_at);
        assert_eq!(before.price, after.price);
        assert_eq!(before.previous_close, after.previous_close);
        assert_eq!(before.fetched_at, after.fetched_at);
    }
    assert_eq!(
        store.latest(&symbol).unwrap().unwrap().observed_at,
        batch[2].observed_at
    );
    assert!(store.symbols().unwrap().contains(&symbol));
    assert!(store.ping().is_ok());

    cleanup(&pool, &symbol);
}

#[tokio::test(flavor = "multi_thread")]
async fn stock_metrics_upsert_and_read_back() {
    let Some(pool) = migrated_pool() else {
        return;
    };
    let store = PgStockMetricsStore::new(pool.clone(), spawn_writer(pool.clone()));
    let symbol = unique_symbol("SM");
    let as_of = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
    let mut row = StockMetrics {
        symbol: symbol.clone(),
        as_of,
        cagr_1y: Some(0.12),
        cagr_3y: None,
        cagr_5y: None,
        volatility_1y: Some(0.31),
        ma_50: Some(180.5),
        ma_200: None,
        rsi_14: Some(55.0),
        sharpe_ratio_1y: Some(0.8),
        max_drawdown_1y: Some(-0.2),
    };

    assert_eq!(store.upsert_metrics(&[row.clone()]).await.unwrap(), 1);
    assert_eq!(store.latest_metrics(&symbol).unwrap(), Some(row.clone()));

    row.ma_50 = Some(181.0);
    store.upsert_metrics(&[row.clone()]).await.unwrap();
    assert_eq!(store.latest_metrics(&symbol).unwrap(), Some(row));

    cleanup(&pool, &symbol);
}
