use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use chrono::Utc;
use tower::ServiceExt;

use finpipe_core::cache::InMemoryCacheStore;
use finpipe_core::fetch::{FailureReason, SymbolFailure};
use finpipe_core::metrics::InMemoryReportQueue;
use finpipe_core::quotes::InMemoryQuoteStore;
use finpipe_core::{FetchCycleResult, JobKind, PipelineMetrics};
use finpipe_server::api::{app_router, ApiState};
use finpipe_server::main_lib::publish_journal;

struct Harness {
    router: axum::Router,
    cache: Arc<InMemoryCacheStore>,
    quotes: Arc<InMemoryQuoteStore>,
    reports: Arc<InMemoryReportQueue>,
    metrics: Arc<PipelineMetrics>,
}

fn build_test_router(with_durable_store: bool) -> Harness {
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    let cache = Arc::new(InMemoryCacheStore::new());
    let quotes = Arc::new(InMemoryQuoteStore::new());
    let reports = Arc::new(InMemoryReportQueue::new());
    let durable: Option<Arc<dyn finpipe_core::QuoteStore>> = if with_durable_store {
        Some(quotes.clone())
    } else {
        None
    };
    let router = app_router(ApiState {
        metrics: metrics.clone(),
        cache: cache.clone(),
        quotes: durable,
        reports: Some(reports.clone()),
    });
    Harness {
        router,
        cache,
        quotes,
        reports,
        metrics,
    }
}

fn one_shot_fetch() -> FetchCycleResult {
    let now = Utc::now();
    FetchCycleResult {
        started_at: now,
        finished_at: now,
        attempted: 2,
        succeeded: vec!["NVDA".to_string()],
        failed: vec![SymbolFailure::new("IBM", FailureReason::Permanent)],
        aborted: None,
        provider_calls: 2,
    }
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let harness = build_test_router(true);
    harness.metrics.record_skipped(JobKind::Fetch);

    let (status, content_type, body) = get(&harness.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));
    assert!(body.contains("finpipe_cycles_skipped_total{job=\"fetch\"} 1"));
    assert!(body.contains("finpipe_fetch_failures_total"));
}

#[tokio::test]
async fn status_endpoint_before_any_cycle() {
    let harness = build_test_router(true);

    let (status, _, body) = get(&harness.router, "/status").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["lastFetch"].is_null());
    assert!(json["lastTransfer"].is_null());
    assert_eq!(json["fetchCyclesSkipped"], 0);
}

#[tokio::test]
async fn health_reports_each_dependency() {
    let harness = build_test_router(true);

    let (status, _, body) = get(&harness.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["durableStore"], true);

    harness.cache.set_available(false);
    let (status, _, body) = get(&harness.router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["cache"], false);
}

#[tokio::test]
async fn health_reports_unreachable_durable_store() {
    let harness = build_test_router(true);
    harness.quotes.set_reachable(false);

    let (status, _, body) = get(&harness.router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["cache"], true);
    assert_eq!(json["durableStore"], false);
}

#[tokio::test]
async fn one_shot_cycles_show_up_on_metrics_endpoint() {
    let harness = build_test_router(true);

    // What `finpipe fetch` does in its own process
    let one_shot = PipelineMetrics::journaling().unwrap();
    one_shot.record_fetch_cycle(&one_shot_fetch());
    one_shot.record_skipped(JobKind::Transfer);
    publish_journal(&one_shot, harness.reports.as_ref()).await;
    assert_eq!(harness.reports.len(), 2);

    let (status, _, body) = get(&harness.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("finpipe_fetch_cycles_total{outcome=\"completed\"} 1"));
    assert!(body.contains("finpipe_fetch_failures_total{reason=\"permanent\"} 1"));
    assert!(body.contains("finpipe_cycles_skipped_total{job=\"transfer\"} 1"));
    assert!(harness.reports.is_empty());

    // Drained once, not counted again
    let (_, _, body) = get(&harness.router, "/metrics").await;
    assert!(body.contains("finpipe_fetch_cycles_total{outcome=\"completed\"} 1"));
}

#[tokio::test]
async fn one_shot_cycles_show_up_on_status_endpoint() {
    let harness = build_test_router(true);
    let one_shot = PipelineMetrics::journaling().unwrap();
    one_shot.record_fetch_cycle(&one_shot_fetch());
    publish_journal(&one_shot, harness.reports.as_ref()).await;

    let (_, _, body) = get(&harness.router, "/status").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["lastFetch"]["succeeded"][0], "NVDA");
    assert!(!json["lastFetchSuccessAt"].is_null());
}

#[tokio::test]
async fn health_without_durable_store_omits_it() {
    let harness = build_test_router(false);

    let (status, _, body) = get(&harness.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json.get("durableStore").is_none());
}
