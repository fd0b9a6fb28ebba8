//! Integration tests for the coordinator API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use capture_coordinator::api::{create_router, AppState};
use coordinator_lib::{
    coordinator::CaptureCoordinator,
    health::{components, HealthRegistry},
    owner::RecordingStreamOwner,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    let (coordinator, _events) = CaptureCoordinator::builder()
        .owner(Arc::new(RecordingStreamOwner::new()))
        .health(health_registry.clone())
        .build()
        .unwrap();
    coordinator.register_health().await;

    let state = Arc::new(AppState::new(health_registry, Arc::new(coordinator)));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn send(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn stream(id: &str, priority: &str, resolution: &str, fps: u32) -> Value {
    json!({
        "stream_id": id,
        "priority": priority,
        "resolution": resolution,
        "frame_rate": fps,
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;
    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["allocator"].is_object());
    assert!(health["components"]["synchronizer"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::THERMAL_MONITOR, "device thermal state is serious")
        .await;

    let (status, health) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::THERMAL_MONITOR, "thermal source unreadable")
        .await;

    let (status, health) = get(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state) = setup_test_app().await;
    let (status, readiness) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;
    state
        .coordinator
        .request_allocation(serde_json::from_value(stream("main", "high", "720p", 30)).unwrap())
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("capture_coordinator_allocations_active"));
    assert!(metrics_text.contains("capture_coordinator_admissions_total"));
    assert!(metrics_text.contains("capture_coordinator_thermal_state"));
}

#[tokio::test]
async fn test_validate_reports_errors_without_failing() {
    let (app, _state) = setup_test_app().await;
    let config = json!({
        "streams": [
            stream("a", "high", "2160p", 60),
            stream("a", "low", "720p", 30),
        ]
    });

    let (status, report) = send(app, "POST", "/v1/validate", config).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["valid"], false);
    let issues: Vec<&str> = report["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["issue"].as_str().unwrap())
        .collect();
    assert!(issues.contains(&"duplicate_stream"));
    assert!(issues.contains(&"unsupported_frame_rate"));
}

#[tokio::test]
async fn test_fallback_returns_supported_configuration() {
    let (app, state) = setup_test_app().await;
    let config = json!({ "streams": [stream("a", "high", "2160p", 60)] });

    let (status, fallback) = send(app, "POST", "/v1/fallback", config).await;

    assert_eq!(status, StatusCode::OK);
    let fallback = serde_json::from_value(fallback).unwrap();
    assert!(state.coordinator.validate_configuration(&fallback).is_valid());
}

#[tokio::test]
async fn test_stream_lifecycle() {
    let (app, state) = setup_test_app().await;

    let (status, created) = send(
        app.clone(),
        "POST",
        "/v1/streams",
        stream("main", "essential", "1080p", 30),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["allocation_id"].is_u64());
    assert_eq!(state.coordinator.allocator().len(), 1);

    let (status, _) = get(app.clone(), "/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    let (status, released) = send(app.clone(), "DELETE", "/v1/streams/main", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["profile"]["stream_id"], "main");

    let (status, _) = send(app, "DELETE", "/v1/streams/main", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_thermal_constraint_maps_to_conflict() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(app.clone(), "POST", "/v1/thermal", json!({ "state": "fair" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transitioned"], true);
    assert_eq!(body["status"]["thermal_state"], "fair");

    let (status, body) = send(
        app,
        "POST",
        "/v1/streams",
        stream("uhd", "essential", "2160p", 30),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "thermal_constraints");
    assert_eq!(body["error"]["recoverable"], true);
}
