//! PostgreSQL durable store for finpipe.
//!
//! Implements [`finpipe_core::QuoteStore`] and
//! [`finpipe_core::StockMetricsStore`] with Diesel. Every write goes through
//! the single writer actor in [`db::write_actor`] so batches never interleave.

pub mod db;
pub mod errors;
pub mod metrics;
pub mod quotes;
pub mod schema;

pub use db::{create_pool, run_migrations, spawn_writer, DbPool, PostgresTarget, WriteHandle};
pub use errors::StorageError;
pub use metrics::PgStockMetricsStore;
pub use quotes::PgQuoteStore;
