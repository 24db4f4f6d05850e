use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use finpipe_core::analytics::StockMetricsStore;
use finpipe_core::{
    AnalyticsJob, CacheStore, FetchConfig, FetchScheduler, PipelineMetrics, QuoteStore,
    ReportQueue, RunLock, TransferConfig, TransferJob,
};
use finpipe_market_data::{
    FinnhubProvider, ProviderClient, ProviderClientConfig, RateLimit, RetryPolicy,
};
use finpipe_storage_postgres::{
    create_pool, db, spawn_writer, DbPool, PgQuoteStore, PgStockMetricsStore, WriteHandle,
};
use finpipe_storage_redis::{KeySpace, RedisCacheStore, RedisReportQueue, RedisRunLock};

use crate::api::ApiState;
use crate::config::{Config, LogFormat};

const POOL_SIZE: u32 = 4;

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init(),
    }
}

/// Handles on the Redis staging area.
pub struct CacheHandles {
    pub cache: Arc<dyn CacheStore>,
    pub lock: Arc<dyn RunLock>,
    pub reports: Arc<dyn ReportQueue>,
}

pub async fn connect_cache(config: &Config) -> anyhow::Result<CacheHandles> {
    let conn = finpipe_storage_redis::connect(&config.redis_host, config.redis_port).await?;
    let keys = KeySpace::new(config.cache_key_prefix.clone());
    Ok(CacheHandles {
        cache: Arc::new(RedisCacheStore::new(conn.clone(), keys.clone())),
        lock: Arc::new(RedisRunLock::new(conn.clone(), keys.clone(), config.run_lock_ttl)),
        reports: Arc::new(RedisReportQueue::new(conn, keys)),
    })
}

/// Handles on the PostgreSQL durable store.
pub struct DurableHandles {
    pub pool: Arc<DbPool>,
    pub writer: WriteHandle,
    pub quotes: Arc<dyn QuoteStore>,
    pub stock_metrics: Arc<dyn StockMetricsStore>,
}

/// Open the pool and start the writer. Migrations are applied on request
/// only; `migrate` or `serve` run them.
pub fn connect_durable(config: &Config) -> anyhow::Result<DurableHandles> {
    let target = config.postgres_target()?;
    tracing::info!(
        "Durable store at {}:{}/{}",
        target.host,
        target.port,
        target.database
    );
    let pool = create_pool(&target, POOL_SIZE)?;
    let writer = spawn_writer(pool.clone());
    Ok(DurableHandles {
        quotes: Arc::new(PgQuoteStore::new(pool.clone(), writer.clone())),
        stock_metrics: Arc::new(PgStockMetricsStore::new(pool.clone(), writer.clone())),
        pool,
        writer,
    })
}

/// Hand a one-shot run's journal to the serving process. Failure only
/// costs visibility, so it is logged and not returned.
pub async fn publish_journal(metrics: &PipelineMetrics, queue: &dyn ReportQueue) {
    let reports = metrics.take_journal();
    if reports.is_empty() {
        return;
    }
    match queue.publish(&reports).await {
        Ok(()) => tracing::debug!("Queued {} cycle reports", reports.len()),
        Err(e) => tracing::warn!("Could not queue {} cycle reports: {}", reports.len(), e),
    }
}

pub fn run_migrations(durable: &DurableHandles) -> anyhow::Result<Vec<String>> {
    Ok(db::run_migrations(&durable.pool)?)
}

pub fn build_fetch_scheduler(
    config: &Config,
    cache: &CacheHandles,
    metrics: Arc<PipelineMetrics>,
) -> anyhow::Result<FetchScheduler> {
    let provider = FinnhubProvider::with_timeout(config.finnhub_api_key()?, config.request_timeout)?
        .with_rate_limit(RateLimit::per_minute(config.requests_per_minute));
    let client = ProviderClient::new(
        Arc::new(provider),
        ProviderClientConfig {
            request_timeout: config.request_timeout,
            retry: RetryPolicy::provider_default().with_max_attempts(config.fetch_max_attempts),
        },
    );

    let mut fetch_config = FetchConfig::new(config.symbols.clone());
    fetch_config.cycle_deadline = config.cycle_deadline;

    Ok(FetchScheduler::new(
        fetch_config,
        Arc::new(client),
        cache.cache.clone(),
        cache.lock.clone(),
        metrics,
    )?)
}

pub fn build_transfer_job(
    config: &Config,
    cache: &CacheHandles,
    durable: &DurableHandles,
    metrics: Arc<PipelineMetrics>,
) -> TransferJob {
    let transfer_config = TransferConfig {
        retry: RetryPolicy::batch_default().with_max_attempts(config.transfer_max_attempts),
    };
    let job = TransferJob::new(
        transfer_config,
        cache.cache.clone(),
        durable.quotes.clone(),
        cache.lock.clone(),
        metrics,
    );
    if config.analytics_enabled {
        job.with_analytics(Arc::new(AnalyticsJob::new(
            durable.quotes.clone(),
            durable.stock_metrics.clone(),
        )))
    } else {
        job
    }
}

/// Everything `serve` runs.
pub struct AppState {
    pub fetch: Arc<FetchScheduler>,
    pub transfer: Arc<TransferJob>,
    pub api: ApiState,
}

pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let metrics = Arc::new(PipelineMetrics::new()?);
    let cache = connect_cache(config).await?;
    let durable = connect_durable(config)?;
    run_migrations(&durable)?;

    let fetch = Arc::new(build_fetch_scheduler(config, &cache, metrics.clone())?);
    let transfer = Arc::new(build_transfer_job(config, &cache, &durable, metrics.clone()));
    tracing::info!(
        "Pipeline ready: {} symbols, {} fetch workers",
        fetch.symbols().len(),
        fetch.workers()
    );

    Ok(AppState {
        fetch,
        transfer,
        api: ApiState {
            metrics,
            cache: cache.cache,
            quotes: Some(durable.quotes),
            reports: Some(cache.reports),
        },
    })
}
