//! Named workflow endpoints.
//!
//! An endpoint is a programmatic invocation point: `POST
//! /v1/endpoints/{name}` merges the caller's JSON body onto the endpoint's
//! default inputs and submits its workflow, subject to authentication,
//! scope checks, and a per-endpoint rate limit.

use crate::error::TriggerError;
use crate::rate_limit::RateLimit;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A named programmatic invocation point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique endpoint name.
    pub name: String,
    /// Workflow to submit.
    pub workflow: String,
    /// Default inputs, overridable by the caller's body.
    #[serde(default)]
    pub inputs: HashMap<String, JsonValue>,
    /// Scopes the caller's credential must carry. Empty means none.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Rate limit string, `N/second|minute|hour`.
    #[serde(default)]
    pub rate_limit: Option<String>,
    /// Per-endpoint run timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Waives authentication entirely.
    #[serde(default)]
    pub public: bool,
}

/// An endpoint with its rate limit parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEndpoint {
    endpoint: Endpoint,
    rate_limit: Option<RateLimit>,
}

impl CompiledEndpoint {
    /// Validates and compiles an endpoint definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty name or a malformed rate
    /// limit string.
    pub fn compile(endpoint: Endpoint) -> Result<Self, TriggerError> {
        if endpoint.name.is_empty() {
            return Err(TriggerError::InvalidConfig {
                reason: "endpoint name must not be empty".to_string(),
            });
        }
        let rate_limit = endpoint
            .rate_limit
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|reason| TriggerError::InvalidConfig { reason })?;
        Ok(Self {
            endpoint,
            rate_limit,
        })
    }

    /// The endpoint definition this was compiled from.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The parsed rate limit, if configured.
    #[must_use]
    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    /// Checks the caller's scopes against the endpoint's requirements.
    ///
    /// # Errors
    ///
    /// Returns `MissingScope` naming the first unmet requirement.
    pub fn check_scopes(&self, caller_scopes: &[String]) -> Result<(), TriggerError> {
        for required in &self.endpoint.scopes {
            if !caller_scopes.contains(required) {
                return Err(TriggerError::MissingScope {
                    scope: required.clone(),
                });
            }
        }
        Ok(())
    }

    /// Merges a caller-provided JSON object onto the default inputs.
    /// Caller keys win; a non-object body is ignored.
    #[must_use]
    pub fn merge_inputs(&self, body: Option<&JsonValue>) -> HashMap<String, JsonValue> {
        let mut inputs = self.endpoint.inputs.clone();
        if let Some(JsonValue::Object(map)) = body {
            for (key, value) in map {
                inputs.insert(key.clone(), value.clone());
            }
        }
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        let mut inputs = HashMap::new();
        inputs.insert("env".to_string(), json!("staging"));
        inputs.insert("dry_run".to_string(), json!(true));
        Endpoint {
            name: "deploy".to_string(),
            workflow: "deploy.yaml".to_string(),
            inputs,
            scopes: vec!["deploy:write".to_string()],
            rate_limit: Some("5/minute".to_string()),
            timeout_secs: None,
            public: false,
        }
    }

    #[test]
    fn compile_parses_rate_limit() {
        let compiled = CompiledEndpoint::compile(endpoint()).unwrap();
        assert_eq!(compiled.rate_limit(), Some(RateLimit::new(5, 60)));
    }

    #[test]
    fn compile_rejects_bad_rate_limit() {
        let mut bad = endpoint();
        bad.rate_limit = Some("5/fortnight".to_string());
        assert!(CompiledEndpoint::compile(bad).is_err());
    }

    #[test]
    fn compile_rejects_empty_name() {
        let mut bad = endpoint();
        bad.name = String::new();
        assert!(CompiledEndpoint::compile(bad).is_err());
    }

    #[test]
    fn scope_check_passes_with_superset() {
        let compiled = CompiledEndpoint::compile(endpoint()).unwrap();
        let scopes = vec!["runs:read".to_string(), "deploy:write".to_string()];
        assert!(compiled.check_scopes(&scopes).is_ok());
    }

    #[test]
    fn scope_check_names_missing_scope() {
        let compiled = CompiledEndpoint::compile(endpoint()).unwrap();
        let result = compiled.check_scopes(&["runs:read".to_string()]);
        assert_eq!(
            result,
            Err(TriggerError::MissingScope {
                scope: "deploy:write".to_string()
            })
        );
    }

    #[test]
    fn caller_body_overrides_defaults() {
        let compiled = CompiledEndpoint::compile(endpoint()).unwrap();
        let body = json!({"env": "production", "version": "1.2.3"});
        let inputs = compiled.merge_inputs(Some(&body));

        assert_eq!(inputs.get("env"), Some(&json!("production")));
        assert_eq!(inputs.get("dry_run"), Some(&json!(true)));
        assert_eq!(inputs.get("version"), Some(&json!("1.2.3")));
    }

    #[test]
    fn non_object_body_is_ignored() {
        let compiled = CompiledEndpoint::compile(endpoint()).unwrap();
        let inputs = compiled.merge_inputs(Some(&json!([1, 2, 3])));
        assert_eq!(inputs.get("env"), Some(&json!("staging")));
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn no_body_keeps_defaults() {
        let compiled = CompiledEndpoint::compile(endpoint()).unwrap();
        let inputs = compiled.merge_inputs(None);
        assert_eq!(inputs.len(), 2);
    }
}
