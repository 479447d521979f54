//! Run submission and inspection handlers.

use crate::auth::{AppState, RequireAuth};
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use conductor_core::RunId;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::str::FromStr;

fn inputs_from_body(body: Option<JsonValue>) -> HashMap<String, JsonValue> {
    match body {
        Some(JsonValue::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

/// `POST /v1/trigger/{workflow}`
pub async fn trigger_workflow(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(workflow): Path<String>,
    body: Option<Json<JsonValue>>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let inputs = inputs_from_body(body.map(|Json(value)| value));
    let run = state.controller.submit_run(&workflow, inputs, None).await?;
    tracing::info!(
        workflow = %workflow,
        run_id = %run.id,
        caller = caller.name(),
        "run triggered via api"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "run_id": run.id,
            "workflow": run.workflow,
            "status": "pending",
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// `GET /v1/runs`
pub async fn list_runs(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let runs = state.controller.store.list_runs(query.limit).await?;
    Ok(Json(json!({"runs": runs})))
}

fn parse_run_id(id: &str) -> Result<RunId, ApiError> {
    RunId::from_str(id).map_err(|_| ApiError::not_found(format!("run not found: {id}")))
}

/// `GET /v1/runs/{id}`
pub async fn get_run(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let run_id = parse_run_id(&id)?;
    let run = state.controller.store.get_run(run_id).await?;
    Ok(Json(serde_json::to_value(run).map_err(|e| {
        ApiError::internal(e.to_string())
    })?))
}

/// `POST /v1/runs/{id}/cancel`
pub async fn cancel_run(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let run_id = parse_run_id(&id)?;
    state.controller.runner.cancel(run_id).await?;
    tracing::info!(run_id = %run_id, caller = caller.name(), "run cancelled via api");
    Ok(StatusCode::NO_CONTENT)
}
