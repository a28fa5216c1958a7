//! Integration tests for the gateway's HTTP surface.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. `WebSocket` routes are only exercised up to the
//! pre-upgrade checks (unknown worker, auth gate); session behaviour is
//! covered in `session_tests.rs`.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use holomirror_core::{HolomirrorConfig, ManualWorker, WorkerHandle};
use holomirror_gateway::router::build_router;
use holomirror_gateway::state::AppState;
use holomirror_types::{Event, Payload, WorkerId, WorkerMetadata};
use serde_json::Value;
use tower::ServiceExt;

fn empty_state() -> Arc<AppState> {
    Arc::new(AppState::new(&HolomirrorConfig::default()))
}

fn state_with_worker() -> (Arc<AppState>, Arc<ManualWorker>) {
    let state = empty_state();
    let worker = Arc::new(ManualWorker::new());
    let mut metadata = WorkerMetadata::new();
    metadata.insert("kind".to_owned(), serde_json::json!("demo"));
    let mirror = state
        .registry
        .register(
            WorkerId::from("w1"),
            Arc::clone(&worker) as Arc<dyn WorkerHandle>,
            metadata,
        )
        .unwrap();
    mirror.publish(Event::custom(WorkerId::from("w1"), "first", Payload::new()));
    mirror.publish(Event::custom(WorkerId::from("w1"), "second", Payload::new()));
    (state, worker)
}

fn auth_state() -> Arc<AppState> {
    let mut config = HolomirrorConfig::default();
    config.gateway.auth_required = true;
    config.gateway.auth_token = Some("s3cret".to_owned());
    let state = Arc::new(AppState::new(&config));
    state
        .registry
        .register(
            WorkerId::from("w1"),
            Arc::new(ManualWorker::new()),
            WorkerMetadata::new(),
        )
        .unwrap();
    state
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(state: Arc<AppState>, uri: &str) -> axum::response::Response {
    build_router(state)
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let (state, _worker) = state_with_worker();
    let response = get(state, "/").await;

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.contains("text/html"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/api/w1/snapshot"));
}

#[tokio::test]
async fn test_health() {
    let response = get(empty_state(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_ready_without_workers_is_unavailable() {
    let response = get(empty_state(), "/ready").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 503);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_ready_with_worker() {
    let (state, _worker) = state_with_worker();
    let response = get(state, "/ready").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["ready"], true);
    assert_eq!(json["workers"], 1);
}

#[tokio::test]
async fn test_ready_during_shutdown_is_unavailable() {
    let (state, _worker) = state_with_worker();
    state.shutdown.cancel();
    let response = get(state, "/ready").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_list_workers() {
    let (state, _worker) = state_with_worker();
    let response = get(state, "/api/workers").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 1);
    let row = &json["workers"][0];
    assert_eq!(row["worker_id"], "w1");
    assert_eq!(row["state"], "running");
    assert_eq!(row["observer_count"], 0);
    assert_eq!(row["history_length"], 2);
}

#[tokio::test]
async fn test_list_workers_empty() {
    let response = get(empty_state(), "/api/workers").await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["count"], 0);
    assert_eq!(json["workers"], serde_json::json!([]));
}

#[tokio::test]
async fn test_snapshot() {
    let (state, _worker) = state_with_worker();
    let response = get(state, "/api/w1/snapshot").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["worker_id"], "w1");
    assert_eq!(json["state"], "running");
    assert_eq!(json["metadata"]["kind"], "demo");
    assert_eq!(json["observer_count"], 0);
    assert!(json["total_events"].as_u64().unwrap() >= 2);

    let history = json["history"].as_array().unwrap();
    let names: Vec<&str> = history
        .iter()
        .filter(|e| e["type"] == "custom")
        .map(|e| e["payload"]["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[tokio::test]
async fn test_snapshot_matches_published_events() {
    let (state, _worker) = state_with_worker();
    let expected = state
        .registry
        .get(&WorkerId::from("w1"))
        .unwrap()
        .mirror()
        .history();

    let response = get(state, "/api/w1/snapshot").await;
    let json = body_to_json(response.into_body()).await;
    let history: Vec<Event> = serde_json::from_value(json["history"].clone()).unwrap();
    assert_eq!(history, expected);
}

#[tokio::test]
async fn test_snapshot_reports_stopped_worker() {
    let (state, worker) = state_with_worker();
    worker.stop();
    let response = get(state, "/api/w1/snapshot").await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["state"], "stopped");
}

#[tokio::test]
async fn test_snapshot_unknown_worker_is_404() {
    let response = get(empty_state(), "/api/ghost/snapshot").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_observe_unknown_worker_is_404_before_upgrade() {
    let response = get(empty_state(), "/observe/ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_perturb_unknown_worker_is_404_before_upgrade() {
    let response = get(empty_state(), "/perturb/ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_observe_known_worker_without_upgrade_is_rejected() {
    let (state, _worker) = state_with_worker();
    let response = get(state, "/observe/w1").await;
    assert_ne!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_perturb_without_token_is_401() {
    let response = get(auth_state(), "/perturb/w1").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn test_perturb_with_wrong_token_is_401() {
    let response = get(auth_state(), "/perturb/w1?token=nope").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_perturb_with_token_passes_the_gate() {
    let response = build_router(auth_state())
        .oneshot(
            Request::get("/perturb/w1")
                .header("authorization", "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // Not a real upgrade request, so the upgrade itself is refused.
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert_ne!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = get(empty_state(), "/api/nothing/here").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unregister_removes_worker_from_listing() {
    let (state, _worker) = state_with_worker();
    assert!(state.registry.unregister(&WorkerId::from("w1")).await);
    assert!(!state.registry.unregister(&WorkerId::from("w1")).await);

    let response = get(Arc::clone(&state), "/api/w1/snapshot").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = get(state, "/ready").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
