//! Named endpoint invocation.

use crate::auth::{AppState, OptionalAuth};
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use conductor_trigger::RateLimitDecision;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

/// `POST /v1/endpoints/{name}` (also served at `/v1/triggers/{name}`).
pub async fn invoke_endpoint(
    State(state): State<AppState>,
    OptionalAuth(caller): OptionalAuth,
    Path(name): Path<String>,
    body: Option<Json<JsonValue>>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let controller = &state.controller;
    if controller.runner.is_draining() {
        return Err(ApiError::draining());
    }

    let endpoint = controller
        .lookup_endpoint(&name)
        .ok_or_else(|| ApiError::not_found(format!("no endpoint named {name}")))?;

    let caller = if endpoint.endpoint().public {
        caller
    } else {
        let caller = caller.ok_or_else(|| ApiError::unauthorized("missing credential"))?;
        if let Some(scopes) = caller.scopes() {
            endpoint.check_scopes(scopes)?;
        }
        Some(caller)
    };

    if let Some(limit) = endpoint.rate_limit() {
        let decision = controller.rate_limiter.try_acquire(&name, limit);
        if let RateLimitDecision::Limited { retry_after_secs } = decision {
            tracing::debug!(endpoint = %name, retry_after_secs, "endpoint rate limited");
            return Err(ApiError::rate_limited(retry_after_secs));
        }
    }

    let inputs = endpoint.merge_inputs(body.as_ref().map(|Json(value)| value));
    let timeout = endpoint.endpoint().timeout_secs.map(Duration::from_secs);
    let run = controller
        .submit_run(&endpoint.endpoint().workflow, inputs, timeout)
        .await?;

    tracing::info!(
        endpoint = %name,
        workflow = %run.workflow,
        run_id = %run.id,
        caller = caller.as_ref().map_or("anonymous", |c| c.name()),
        "endpoint invoked"
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
