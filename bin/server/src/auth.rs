//! Authentication middleware and extractors.
//!
//! The middleware validates credentials and attaches a `Caller` to the
//! request; handlers opt into enforcement through the `RequireAuth`
//! extractor (or `OptionalAuth` for endpoints that may be public). The
//! health endpoint bypasses auth, unix-socket requests bypass it when
//! configured, and an `api_key` query parameter is always rejected
//! because access logs would capture it.

use crate::controller::Controller;
use crate::error::ApiError;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use conductor_auth::{extract_bearer, UserContext};
use std::sync::Arc;

/// Shared state for the HTTP layer. `local` marks the unix-socket
/// listener's router.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub local: bool,
}

/// The authenticated identity of a request.
#[derive(Debug, Clone)]
pub enum Caller {
    /// Trusted without a credential: unix socket, or auth disabled.
    Local,
    /// Authenticated by API key.
    Key(UserContext),
}

impl Caller {
    /// Scopes carried by the caller; `None` means unrestricted.
    #[must_use]
    pub fn scopes(&self) -> Option<&[String]> {
        match self {
            Self::Local => None,
            Self::Key(user) => Some(&user.scopes),
        }
    }

    /// Name for audit logging.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Key(user) => &user.name,
        }
    }
}

fn has_api_key_query(query: Option<&str>) -> bool {
    query.is_some_and(|query| {
        query
            .split('&')
            .any(|pair| pair.split('=').next() == Some("api_key"))
    })
}

/// Credential-validation middleware.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/v1/health" || path == "/metrics" {
        return next.run(request).await;
    }

    if has_api_key_query(request.uri().query()) {
        return ApiError::unauthorized(
            "api_key query parameters are not accepted; use the Authorization header",
        )
        .into_response();
    }

    let auth = &state.controller.config.auth;
    if (state.local && auth.allow_unix_socket) || !auth.enabled {
        request.extensions_mut().insert(Caller::Local);
        return next.run(request).await;
    }

    let token = credential_from_headers(&request);
    if let Some(token) = token {
        match state
            .controller
            .key_set
            .authenticate(&token, state.controller.clock.now())
        {
            Ok(user) => {
                request.extensions_mut().insert(Caller::Key(user));
            }
            Err(e) => {
                tracing::debug!(error = %e, "credential rejected");
                return ApiError::unauthorized(e.to_string()).into_response();
            }
        }
    }
    // No credential: handlers using RequireAuth reject, public ones pass
    next.run(request).await
}

fn credential_from_headers(request: &Request) -> Option<String> {
    if let Some(authorization) = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = extract_bearer(authorization) {
            return Some(token.to_string());
        }
    }
    request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Extractor requiring an authenticated caller.
pub struct RequireAuth(pub Caller);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .map(RequireAuth)
            .ok_or_else(|| ApiError::unauthorized("missing credential"))
    }
}

/// Extractor yielding the caller when one authenticated.
pub struct OptionalAuth(pub Option<Caller>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<Caller>().cloned()))
    }
}
