//! Trigger-management CRUD and poll-trigger operations.

use crate::auth::{AppState, RequireAuth};
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use conductor_poll::PollTrigger;
use conductor_scheduler::ScheduleEntry;
use conductor_trigger::{Endpoint, TriggerKind, WebhookRoute};
use conductor_watcher::FileWatch;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::str::FromStr;

#[derive(Debug, Default, Deserialize)]
pub struct ListTriggersQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// `GET /v1/triggers?type=...`
pub async fn list_triggers(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Query(query): Query<ListTriggersQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let kind = query
        .kind
        .as_deref()
        .map(TriggerKind::from_str)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let controller = &state.controller;
    let mut listing = serde_json::Map::new();
    let wants = |wanted: TriggerKind| kind.is_none() || kind == Some(wanted);

    if wants(TriggerKind::Webhook) {
        listing.insert("webhooks".to_string(), json!(controller.webhook_routes()));
    }
    if wants(TriggerKind::Schedule) {
        listing.insert("schedules".to_string(), json!(controller.schedule_entries()));
    }
    if wants(TriggerKind::Endpoint) {
        listing.insert(
            "endpoints".to_string(),
            json!(controller.endpoint_definitions()),
        );
    }
    if wants(TriggerKind::FileWatcher) {
        listing.insert("file_watchers".to_string(), json!(controller.file_watches()));
    }
    if wants(TriggerKind::Poll) {
        listing.insert(
            "poll".to_string(),
            json!(controller.poll_service.status().await),
        );
    }

    Ok(Json(JsonValue::Object(listing)))
}

/// `POST /v1/triggers/webhooks`
pub async fn create_webhook(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Json(route): Json<WebhookRoute>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let id = route.path.clone();
    state.controller.add_webhook(route)?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// `DELETE /v1/triggers/webhooks/{*path}`
pub async fn delete_webhook(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.remove_webhook(&format!("/{path}"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/triggers/schedules`
pub async fn create_schedule(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Json(entry): Json<ScheduleEntry>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let id = entry.name.clone();
    state.controller.add_schedule(entry)?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// `DELETE /v1/triggers/schedules/{name}`
pub async fn delete_schedule(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.remove_schedule(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/triggers/endpoints`
pub async fn create_endpoint(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Json(endpoint): Json<Endpoint>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let id = endpoint.name.clone();
    state.controller.add_endpoint(endpoint)?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// `DELETE /v1/triggers/endpoints/{name}`
pub async fn delete_endpoint(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.remove_endpoint(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/triggers/file-watchers`
pub async fn create_file_watch(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Json(watch): Json<FileWatch>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let id = watch.name.clone();
    state.controller.add_file_watch(watch)?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// `DELETE /v1/triggers/file-watchers/{name}`
pub async fn delete_file_watch(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.remove_file_watch(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/triggers/poll`
pub async fn poll_status(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
) -> Json<JsonValue> {
    Json(json!({"triggers": state.controller.poll_service.status().await}))
}

/// `POST /v1/triggers/poll`
pub async fn create_poll_trigger(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Json(trigger): Json<PollTrigger>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let id = state.controller.poll_service.register(trigger).await?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

/// `DELETE /v1/triggers/poll/{id}`
pub async fn delete_poll_trigger(
    State(state): State<AppState>,
    RequireAuth(_caller): RequireAuth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.poll_service.unregister(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/triggers/poll/{id}/reset`
pub async fn reset_poll_trigger(
    State(state): State<AppState>,
    RequireAuth(caller): RequireAuth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.controller.poll_service.reset(&id).await?;
    tracing::info!(trigger_id = %id, caller = caller.name(), "poll trigger reset");
    Ok(StatusCode::NO_CONTENT)
}
