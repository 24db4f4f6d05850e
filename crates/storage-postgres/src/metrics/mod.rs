//! PostgreSQL storage for derived per-symbol indicators.

mod model;
mod repository;

pub use model::{NewStockMetricsDB, StockMetricsDB};
pub use repository::PgStockMetricsStore;
