//! HTTP surface over `Engine` (spec.md §6 "External interfaces").

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use engine_backend::sim::SimulatedBackend;
use engine_common::{AdmissionError, EngineConfig};
use engine_core::Engine;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
}

/// Builds the router over a fresh `Engine` seeded from `EngineConfig::load()`
/// and the reference `SimulatedBackend` (spec.md §1: "the actual GPU... a
/// simulator stands in").
pub fn app() -> Router {
    let config = EngineConfig::load();
    let backend = Arc::new(SimulatedBackend::new(config.prefill_rate, config.decode_base));
    let engine = Arc::new(Engine::start(config, backend));
    app_with_engine(engine)
}

pub fn app_with_engine(engine: Arc<Engine>) -> Router {
    engine_obs::init();
    let state = AppState { engine };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/metrics_snapshot", get(metrics_snapshot))
        .route("/submit", post(submit))
        .route("/tenant", post(register_tenant))
        .route("/tenant/:id", get(tenant_status))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.engine.metrics_snapshot();
    engine_obs::observe(&snapshot);
    ([("content-type", "text/plain; version=0.0.4")], engine_obs::render())
}

async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.metrics_snapshot())
}

#[derive(serde::Deserialize)]
struct RegisterTenantRequest {
    tenant_id: String,
    rate: f64,
    burst_cap: f64,
}

async fn register_tenant(
    State(state): State<AppState>,
    Json(req): Json<RegisterTenantRequest>,
) -> impl IntoResponse {
    state
        .engine
        .register_tenant(&req.tenant_id, req.rate, req.burst_cap);
    StatusCode::NO_CONTENT
}

async fn tenant_status(State(state): State<AppState>, Path(tenant_id): Path<String>) -> impl IntoResponse {
    match state.engine.tenant_status(&tenant_id) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(err) => admission_error_response(err),
    }
}

#[derive(serde::Deserialize)]
struct SubmitRequest {
    tenant_id: String,
    prompt: String,
    tokens_requested: i64,
    priority_bid: i32,
}

async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> impl IntoResponse {
    let rx = match state.engine.submit(
        &req.tenant_id,
        &req.prompt,
        req.tokens_requested,
        req.priority_bid,
    ) {
        Ok(rx) => rx,
        Err(err) => return admission_error_response(err),
    };

    match rx.await {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(dispatch_err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": dispatch_err.to_string() })),
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "completion handle dropped" })),
        )
            .into_response(),
    }
}

fn admission_error_response(err: AdmissionError) -> axum::response::Response {
    let status = match &err {
        AdmissionError::UnknownTenant(_) => StatusCode::NOT_FOUND,
        AdmissionError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AdmissionError::InvalidPriority(_) | AdmissionError::InvalidTokens(_) => StatusCode::BAD_REQUEST,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
