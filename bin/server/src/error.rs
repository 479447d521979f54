//! API error responses.
//!
//! Every non-2xx response body is `{"error": "<message>"}`. Capacity and
//! rate-limit rejections additionally carry `Retry-After`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use conductor_poll::PollError;
use conductor_runner::RunnerError;
use conductor_store::StoreError;
use conductor_trigger::TriggerError;
use serde_json::json;

/// A request-scoped failure mapped onto an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "rate limit exceeded".to_string(),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn draining() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "controller is draining".to_string(),
            retry_after_secs: Some(10),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response =
            (self.status, Json(json!({"error": self.message}))).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<RunnerError> for ApiError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::Draining => Self::draining(),
            RunnerError::Capacity => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: e.to_string(),
                retry_after_secs: Some(10),
            },
            RunnerError::InvalidWorkflow { .. } => Self::bad_request(e.to_string()),
            RunnerError::RunNotFound { .. } => Self::not_found(e.to_string()),
            RunnerError::Store(_) | RunnerError::DrainTimeout { .. } | RunnerError::NoFetcher => {
                tracing::error!(error = %e, "internal runner failure");
                Self::internal("internal error")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RunNotFound { .. } => Self::not_found(e.to_string()),
            other => {
                tracing::error!(error = %other, "internal store failure");
                Self::internal("internal error")
            }
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::InvalidConfig { .. } | TriggerError::InvalidPayload { .. } => {
                Self::bad_request(e.to_string())
            }
            TriggerError::SignatureInvalid { .. } => Self::unauthorized(e.to_string()),
            TriggerError::MissingScope { .. } => Self::forbidden(e.to_string()),
            TriggerError::RateLimited { retry_after_secs } => Self::rate_limited(retry_after_secs),
        }
    }
}

impl From<PollError> for ApiError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::InvalidQuery { .. } | PollError::UnknownIntegration { .. } => {
                Self::bad_request(e.to_string())
            }
            PollError::TriggerExists { .. } => Self::conflict(e.to_string()),
            PollError::TriggerNotFound { .. } => Self::not_found(e.to_string()),
            PollError::TriggerPaused { .. } => Self::conflict(e.to_string()),
            other => {
                tracing::error!(error = %other, "internal poll failure");
                Self::internal("internal error")
            }
        }
    }
}
