//! Webhook ingestion.
//!
//! Configured routes are matched by full path; anything else falls back
//! to the catch-all `/webhooks/{source}/{workflow}` convention with no
//! signature requirement and default payload flattening.

use crate::auth::AppState;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use conductor_trigger::{
    CompiledRoute, WebhookOutcome, WebhookRequest, WebhookRoute, WebhookSource,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_lowercase(), value.to_string()))
        })
        .collect()
}

/// Builds the ad-hoc route for `/webhooks/{source}/{workflow...}`.
fn catch_all_route(path: &str, rest: &str) -> Result<CompiledRoute, ApiError> {
    let (source, workflow) = rest
        .split_once('/')
        .ok_or_else(|| ApiError::not_found(format!("no webhook route at {path}")))?;
    if workflow.is_empty() {
        return Err(ApiError::not_found(format!("no webhook route at {path}")));
    }
    let source = source.parse::<WebhookSource>().unwrap_or_default();
    let route = WebhookRoute {
        path: path.to_string(),
        source,
        workflow: workflow.to_string(),
        events: Vec::new(),
        secret: None,
        input_map: HashMap::new(),
    };
    CompiledRoute::compile(route, |_| None).map_err(ApiError::from)
}

/// `POST /webhooks/{*rest}`
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let controller = &state.controller;
    if controller.runner.is_draining() {
        return Err(ApiError::draining());
    }

    let path = format!("/webhooks/{rest}");
    let route = match controller.lookup_webhook(&path) {
        Some(route) => route,
        None => catch_all_route(&path, &rest)?,
    };

    let request = WebhookRequest {
        headers: lowercase_headers(&headers),
        body: body.to_vec(),
    };

    let outcome = route
        .process(&request, controller.clock.now())
        .map_err(|e| {
            controller.metrics.webhook_request("rejected");
            tracing::warn!(path = %path, error = %e, "webhook rejected");
            ApiError::from(e)
        })?;

    match outcome {
        WebhookOutcome::Accepted {
            workflow,
            event,
            inputs,
        } => {
            let run = controller.submit_run(&workflow, inputs, None).await?;
            controller.metrics.webhook_request("accepted");
            tracing::info!(
                path = %path,
                event = %event,
                workflow = %workflow,
                run_id = %run.id,
                "webhook accepted"
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
        WebhookOutcome::Ignored { event } => {
            controller.metrics.webhook_request("ignored");
            tracing::debug!(path = %path, event = %event, "webhook event ignored");
            Ok((
                StatusCode::OK,
                Json(json!({"status": "ignored", "event": event})),
            ))
        }
    }
}
