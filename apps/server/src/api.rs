//! Read-only HTTP surface: Prometheus text, a JSON status snapshot and a
//! dependency health check.
//!
//! `/metrics` and `/status` first fold in any cycle reports queued by
//! one-shot `fetch` and `transfer` runs.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;

use crate::error::ApiResult;
use finpipe_core::metrics::StatusSnapshot;
use finpipe_core::{CacheStore, PipelineMetrics, QuoteStore, ReportQueue};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<PipelineMetrics>,
    pub cache: Arc<dyn CacheStore>,
    /// Absent when the process runs without a durable store.
    pub quotes: Option<Arc<dyn QuoteStore>>,
    /// Reports from one-shot runs, applied before every read.
    pub reports: Option<Arc<dyn ReportQueue>>,
}

impl ApiState {
    /// Apply queued reports. A queue failure leaves the local view as is.
    async fn absorb_reports(&self) {
        let Some(queue) = &self.reports else {
            return;
        };
        match queue.drain().await {
            Ok(reports) => {
                for report in &reports {
                    self.metrics.apply(report);
                }
            }
            Err(e) => warn!("Could not drain queued cycle reports: {}", e),
        }
    }
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(state)
}

async fn metrics(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    state.absorb_reports().await;
    let body = state.metrics.encode()?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}

async fn status(State(state): State<ApiState>) -> Json<StatusSnapshot> {
    state.absorb_reports().await;
    Json(state.metrics.status())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    durable_store: Option<bool>,
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let cache = state.cache.ping().await.is_ok();

    let durable_store = match &state.quotes {
        Some(quotes) => {
            let quotes = quotes.clone();
            let reachable = tokio::task::spawn_blocking(move || quotes.ping().is_ok())
                .await
                .unwrap_or(false);
            Some(reachable)
        }
        None => None,
    };

    let healthy = cache && durable_store.unwrap_or(true);
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let report = HealthReport {
        status: if healthy { "ok" } else { "degraded" },
        cache,
        durable_store,
    };
    (code, Json(report))
}
