//! In-process timers for `serve` mode.
//!
//! Fetch runs every `FETCH_INTERVAL_HOURS`, starting immediately; ticks missed
//! while a cycle overran are skipped rather than bunched. Transfer runs once a
//! day at `TRANSFER_AT_UTC`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use finpipe_core::{FetchScheduler, Invocation, TransferJob};

/// Starts the periodic fetch loop.
pub fn start_fetch_scheduler(fetch: Arc<FetchScheduler>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Fetch scheduler started ({}s interval)", period.as_secs());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match fetch.invoke().await {
                Invocation::Completed(result) => info!(
                    "Scheduled fetch finished: {}/{} succeeded",
                    result.succeeded.len(),
                    result.attempted
                ),
                Invocation::Skipped => info!("Scheduled fetch skipped: previous cycle still running"),
            }
        }
    })
}

/// Starts the daily transfer loop.
pub fn start_transfer_scheduler(transfer: Arc<TransferJob>, at: NaiveTime) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Transfer scheduler started (daily at {} UTC)", at.format("%H:%M"));
        loop {
            let now = Utc::now();
            let next = next_run_after(now, at);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next transfer at {}", next.to_rfc3339());
            tokio::time::sleep(wait).await;

            match transfer.invoke().await {
                Ok(Invocation::Completed(result)) => info!(
                    "Scheduled transfer finished: {} upserted, {} retired",
                    result.upserted, result.retired
                ),
                Ok(Invocation::Skipped) => {
                    info!("Scheduled transfer skipped: previous cycle still running")
                }
                Err(e) => error!("Scheduled transfer failed: {}", e),
            }
        }
    })
}

/// First instant strictly after `now` whose UTC wall-clock time is `at`.
pub fn next_run_after(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        return today;
    }
    now.date_naive()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(at).and_utc())
        .unwrap_or(today)
}
