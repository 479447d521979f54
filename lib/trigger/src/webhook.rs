//! Webhook routes.
//!
//! A `WebhookRoute` binds a URL path to a workflow, with per-source
//! signature verification, an optional event allowlist, and a payload
//! mapping table. Routes are compiled once at registration: mapping
//! expressions are parsed and the secret reference is resolved from the
//! environment. The HTTP layer hands a `WebhookRequest` to
//! `CompiledRoute::process` and maps the outcome onto status codes.

use crate::error::TriggerError;
use crate::mapping::{flatten_top_level, InputMapping};
use crate::signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The webhook source, which selects header conventions and the signature
/// scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    Github,
    Slack,
    #[default]
    Generic,
}

impl fmt::Display for WebhookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Github => "github",
            Self::Slack => "slack",
            Self::Generic => "generic",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WebhookSource {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "slack" => Ok(Self::Slack),
            "generic" => Ok(Self::Generic),
            other => Err(TriggerError::InvalidConfig {
                reason: format!("unknown webhook source: {other}"),
            }),
        }
    }
}

/// A path-bound webhook binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRoute {
    /// URL path the route is served on (unique).
    pub path: String,
    /// Source kind.
    #[serde(default)]
    pub source: WebhookSource,
    /// Workflow to submit.
    pub workflow: String,
    /// Allowed event kinds; empty admits all.
    #[serde(default)]
    pub events: Vec<String>,
    /// Verification secret reference, written `${ENV_VAR}`.
    #[serde(default)]
    pub secret: Option<String>,
    /// Input-mapping table: input name to literal or `$.path` expression.
    #[serde(default)]
    pub input_map: HashMap<String, String>,
}

/// A raw inbound webhook request, decoupled from the HTTP framework.
/// Header names are lower-cased by the caller.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn require_header(&self, name: &str) -> Result<&str, TriggerError> {
        self.header(name).ok_or_else(|| TriggerError::SignatureInvalid {
            reason: format!("missing {name} header"),
        })
    }
}

/// The result of processing a webhook request.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// The event passed all checks; submit the workflow with these inputs.
    Accepted {
        workflow: String,
        event: String,
        inputs: HashMap<String, JsonValue>,
    },
    /// The event is not on the route's allowlist.
    Ignored { event: String },
}

/// A route with its mapping compiled and secret resolved.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    route: WebhookRoute,
    mapping: InputMapping,
    secret: Option<String>,
}

impl CompiledRoute {
    /// Compiles a route definition.
    ///
    /// `resolve_env` looks up environment variables for the secret
    /// reference; the server passes `std::env::var`-backed lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the secret reference is malformed or
    /// the referenced variable is unset.
    pub fn compile(
        route: WebhookRoute,
        resolve_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, TriggerError> {
        if route.path.is_empty() || !route.path.starts_with('/') {
            return Err(TriggerError::InvalidConfig {
                reason: format!("webhook path must start with '/': '{}'", route.path),
            });
        }
        let secret = match route.secret.as_deref() {
            Some(reference) => {
                let var = reference
                    .strip_prefix("${")
                    .and_then(|r| r.strip_suffix('}'))
                    .ok_or_else(|| TriggerError::InvalidConfig {
                        reason: format!("secret must be an ${{ENV_VAR}} reference: '{reference}'"),
                    })?;
                let value = resolve_env(var).ok_or_else(|| TriggerError::InvalidConfig {
                    reason: format!("secret environment variable {var} is not set"),
                })?;
                Some(value)
            }
            None => None,
        };
        let mapping = InputMapping::compile(&route.input_map);
        Ok(Self {
            route,
            mapping,
            secret,
        })
    }

    /// The route definition this was compiled from.
    #[must_use]
    pub fn route(&self) -> &WebhookRoute {
        &self.route
    }

    /// Processes a request: verifies the signature, extracts the event,
    /// applies the allowlist, and shapes the inputs.
    ///
    /// # Errors
    ///
    /// Returns `SignatureInvalid` or `InvalidPayload`; both map to request
    /// rejections, never to workflow submissions.
    pub fn process(
        &self,
        request: &WebhookRequest,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, TriggerError> {
        if let Some(secret) = &self.secret {
            self.verify_signature(secret, request, now)?;
        }

        let payload = parse_payload(&request.body)?;
        let event = extract_event(self.route.source, request, &payload);

        if !self.route.events.is_empty() && !self.route.events.contains(&event) {
            return Ok(WebhookOutcome::Ignored { event });
        }

        let mut inputs = if self.mapping.is_empty() {
            flatten_top_level(&payload)
        } else {
            self.mapping.apply(&payload)
        };
        inputs.insert("_event".to_string(), JsonValue::String(event.clone()));
        inputs.insert(
            "_source".to_string(),
            JsonValue::String(self.route.source.to_string()),
        );
        inputs.insert("_payload".to_string(), payload);

        Ok(WebhookOutcome::Accepted {
            workflow: self.route.workflow.clone(),
            event,
            inputs,
        })
    }

    fn verify_signature(
        &self,
        secret: &str,
        request: &WebhookRequest,
        now: DateTime<Utc>,
    ) -> Result<(), TriggerError> {
        match self.route.source {
            WebhookSource::Github => {
                let header = request.require_header("x-hub-signature-256")?;
                signature::verify_github(secret, &request.body, header)
            }
            WebhookSource::Slack => {
                let timestamp = request.require_header("x-slack-request-timestamp")?;
                let sig = request.require_header("x-slack-signature")?;
                signature::verify_slack(secret, &request.body, timestamp, sig, now)
            }
            WebhookSource::Generic => {
                let header = request.require_header("x-webhook-signature")?;
                signature::verify_generic(secret, &request.body, header)
            }
        }
    }
}

fn parse_payload(body: &[u8]) -> Result<JsonValue, TriggerError> {
    if body.is_empty() {
        return Ok(JsonValue::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| TriggerError::InvalidPayload {
        reason: e.to_string(),
    })
}

/// Pulls the event kind out of source-specific headers or body fields.
fn extract_event(source: WebhookSource, request: &WebhookRequest, payload: &JsonValue) -> String {
    match source {
        WebhookSource::Github => request
            .header("x-github-event")
            .unwrap_or("unknown")
            .to_string(),
        WebhookSource::Slack => {
            // Events API wraps the event; unwrap event_callback envelopes
            let outer = payload.get("type").and_then(JsonValue::as_str);
            if outer == Some("event_callback") {
                payload
                    .get("event")
                    .and_then(|e| e.get("type"))
                    .and_then(JsonValue::as_str)
                    .unwrap_or("event_callback")
                    .to_string()
            } else {
                outer.unwrap_or("unknown").to_string()
            }
        }
        WebhookSource::Generic => payload
            .get("event")
            .or_else(|| payload.get("type"))
            .and_then(JsonValue::as_str)
            .unwrap_or("unknown")
            .to_string(),
    }
}
