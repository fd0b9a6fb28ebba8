//! HTTP API for health checks, Prometheus metrics and coordinator control

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use coordinator_lib::{
    coordinator::CaptureCoordinator,
    health::{ComponentStatus, HealthRegistry},
    models::{AllocationId, CaptureConfiguration, StreamProfile},
    thermal::ThermalState,
    CoordinatorError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub coordinator: Arc<CaptureCoordinator>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, coordinator: Arc<CaptureCoordinator>) -> Self {
        Self {
            health_registry,
            coordinator,
        }
    }
}

/// Coordinator errors as JSON responses
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::InsufficientResources { .. }
            | CoordinatorError::ThermalConstraints { .. } => StatusCode::CONFLICT,
            CoordinatorError::AllocationNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::HardwareNotSupported(_)
            | CoordinatorError::SynchronizationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoordinatorError::ThermalSource(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "code": self.0.kind(),
                "message": self.0.to_string(),
                "recoverable": self.0.is_recoverable(),
            }
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AllocationResponse {
    pub allocation_id: AllocationId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThermalSignal {
    pub state: ThermalState,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coordinator.status())
}

/// Validation never fails the request; the report carries the verdict
async fn validate(
    State(state): State<Arc<AppState>>,
    Json(config): Json<CaptureConfiguration>,
) -> impl IntoResponse {
    let report = state.coordinator.validate_configuration(&config);
    Json(json!({
        "valid": report.is_valid(),
        "errors": report.errors,
        "warnings": report.warnings,
    }))
}

async fn fallback(
    State(state): State<Arc<AppState>>,
    Json(config): Json<CaptureConfiguration>,
) -> impl IntoResponse {
    Json(state.coordinator.fallback_configuration(&config))
}

async fn request_stream(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<StreamProfile>,
) -> Result<impl IntoResponse, ApiError> {
    let allocation_id = state.coordinator.request_allocation(profile)?;
    Ok((
        StatusCode::CREATED,
        Json(AllocationResponse { allocation_id }),
    ))
}

async fn release_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.release_stream(&stream_id) {
        Some(allocation) => (StatusCode::OK, Json(json!(allocation))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "code": "stream_not_found", "message": stream_id } })),
        ),
    }
}

/// Inject a thermal state, as a platform notification would
async fn thermal_signal(
    State(state): State<Arc<AppState>>,
    Json(signal): Json<ThermalSignal>,
) -> impl IntoResponse {
    let transitioned = state.coordinator.handle_thermal_signal(signal.state).is_some();
    Json(json!({
        "transitioned": transitioned,
        "status": state.coordinator.status(),
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/status", get(status))
        .route("/v1/validate", post(validate))
        .route("/v1/fallback", post(fallback))
        .route("/v1/streams", post(request_stream))
        .route("/v1/streams/:stream_id", delete(release_stream))
        .route("/v1/thermal", post(thermal_signal))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
