//! Finpipe Core - the fetch, stage and transfer pipeline.
//!
//! This crate holds the pipeline's jobs and the storage contracts they run
//! against. It is storage-agnostic: the Redis cache and PostgreSQL durable
//! store live in `storage-redis` and `storage-postgres`, which implement the
//! traits defined here.

pub mod analytics;
pub mod cache;
pub mod errors;
pub mod fetch;
pub mod metrics;
pub mod quotes;
pub mod run_lock;
pub mod transfer;

pub use analytics::{AnalyticsJob, StockMetrics, StockMetricsStore};
pub use cache::CacheStore;
pub use fetch::{FailureReason, FetchConfig, FetchCycleResult, FetchScheduler};
pub use metrics::{CycleReport, PipelineMetrics, ReportQueue};
pub use quotes::{QuoteRecord, QuoteStore};
pub use run_lock::{Invocation, JobKind, LocalRunLock, RunLock};
pub use transfer::{TransferConfig, TransferCycleResult, TransferJob};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
