use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};

use finpipe_core::{Invocation, PipelineMetrics};
use finpipe_market_data::normalize_symbol;
use finpipe_server::api::app_router;
use finpipe_server::config::Config;
use finpipe_server::main_lib::{
    build_fetch_scheduler, build_state, build_transfer_job, connect_cache, connect_durable,
    init_tracing, publish_journal, run_migrations,
};
use finpipe_server::scheduler;

#[derive(Parser)]
#[command(
    name = "finpipe",
    about = "Fetch quotes into Redis, transfer them daily into PostgreSQL"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fetch and transfer on internal timers and serve metrics.
    Serve,
    /// Run one fetch cycle and exit.
    Fetch,
    /// Run one transfer cycle and exit.
    Transfer,
    /// Create or upgrade the durable store schema.
    Migrate,
    /// Print the latest persisted quote for a symbol.
    Latest {
        /// Ticker, e.g. AAPL.
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::Fetch => fetch_once(&config).await,
        Commands::Transfer => transfer_once(&config).await,
        Commands::Migrate => {
            let durable = connect_durable(&config)?;
            let applied = run_migrations(&durable)?;
            tracing::info!("{} migrations applied", applied.len());
            Ok(())
        }
        Commands::Latest { symbol } => {
            let durable = connect_durable(&config)?;
            let symbol = normalize_symbol(&symbol);
            match durable.quotes.latest(&symbol)? {
                Some(quote) => println!("{}", serde_json::to_string_pretty(&quote)?),
                None => bail!("no persisted quote for {}", symbol),
            }
            Ok(())
        }
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    scheduler::start_fetch_scheduler(state.fetch.clone(), config.fetch_interval);
    scheduler::start_transfer_scheduler(state.transfer.clone(), config.transfer_at);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let router = app_router(state.api);
    tracing::info!("Metrics listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn fetch_once(config: &Config) -> anyhow::Result<()> {
    let metrics = Arc::new(PipelineMetrics::journaling()?);
    let cache = connect_cache(config).await?;
    let fetch = build_fetch_scheduler(config, &cache, metrics.clone())?;

    let invocation = fetch.invoke().await;
    publish_journal(&metrics, cache.reports.as_ref()).await;
    match invocation {
        Invocation::Completed(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            if let Some(reason) = &result.aborted {
                bail!("fetch cycle aborted: {}", reason);
            }
        }
        Invocation::Skipped => tracing::warn!("Fetch skipped: another cycle holds the run lock"),
    }
    Ok(())
}

async fn transfer_once(config: &Config) -> anyhow::Result<()> {
    let metrics = Arc::new(PipelineMetrics::journaling()?);
    let cache = connect_cache(config).await?;
    let durable = connect_durable(config)?;
    let transfer = build_transfer_job(config, &cache, &durable, metrics.clone());

    let invocation = transfer.invoke().await;
    publish_journal(&metrics, cache.reports.as_ref()).await;
    match invocation? {
        Invocation::Completed(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?)
        }
        Invocation::Skipped => {
            tracing::warn!("Transfer skipped: another cycle holds the run lock")
        }
    }
    Ok(())
}
