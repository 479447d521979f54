//! Liveness, version, and metrics handlers.

use crate::auth::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// `GET /v1/health`
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let controller = &state.controller;
    Json(json!({
        "status": "ok",
        "draining": controller.runner.is_draining(),
        "active_runs": controller.runner.active_run_count(),
        "scheduler_leader": controller.is_scheduler_leader(),
    }))
}

/// `GET /v1/version`
pub async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "commit": option_env!("CONDUCTOR_COMMIT").unwrap_or("unknown"),
        "build_date": option_env!("CONDUCTOR_BUILD_DATE").unwrap_or("unknown"),
    }))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.controller.metrics.render(),
    )
}
