//! Credential-leak defenses for polled events and error messages.
//!
//! Events cross from integration responses into workflow inputs, and error
//! strings cross into persisted state and logs. Both paths are scrubbed:
//! events by recursive key deletion, errors by regex redaction of common
//! credential shapes.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

/// Key suffix/substring rules applied to every event, lower-cased.
fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.ends_with("token")
        || key.ends_with("secret")
        || key.ends_with("password")
        || key.ends_with("key")
        || key.contains("auth")
        || key.starts_with("credential")
        || key == "api_key"
        || key == "app_key"
}

/// Integration-specific keys stripped in addition to the common rules.
fn integration_deny_list(integration: &str) -> &'static [&'static str] {
    match integration {
        "slack" => &["authed_users", "authed_teams", "authorizations"],
        "datadog" => &["application_key"],
        _ => &[],
    }
}

/// Recursively removes sensitive keys from an event before it reaches the
/// workflow firer. Arrays and nested objects are traversed.
pub fn strip_sensitive_fields(value: &mut JsonValue, integration: &str) {
    let extra = integration_deny_list(integration);
    strip_recursive(value, extra);
}

fn strip_recursive(value: &mut JsonValue, extra: &[&str]) {
    match value {
        JsonValue::Object(map) => {
            map.retain(|key, _| !is_sensitive_key(key) && !extra.contains(&key.as_str()));
            for child in map.values_mut() {
                strip_recursive(child, extra);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                strip_recursive(item, extra);
            }
        }
        _ => {}
    }
}

fn redaction_rules() -> &'static Vec<(Regex, &'static str)> {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            // HTTP auth headers
            (r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+", "bearer [REDACTED]"),
            (r"(?i)basic\s+[A-Za-z0-9+/=]+", "basic [REDACTED]"),
            // Slack bot/user/app tokens
            (r"xox[abops]-[A-Za-z0-9-]+", "[REDACTED]"),
            // Datadog header form
            (r"(?i)dd-api-key:\s*\S+", "DD-API-KEY: [REDACTED]"),
            // PagerDuty header form
            (r"(?i)token token=\S+", "Token token=[REDACTED]"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("redaction pattern compiles"),
                replacement,
            )
        })
        .collect()
    })
}

/// Redacts credential shapes from an error message before it is persisted
/// or logged.
#[must_use]
pub fn redact_error(message: &str) -> String {
    let mut redacted = message.to_string();
    for (pattern, replacement) in redaction_rules() {
        redacted = pattern.replace_all(&redacted, *replacement).into_owned();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_common_credential_keys() {
        let mut event = json!({
            "id": "e1",
            "api_key": "secret",
            "access_token": "secret",
            "client_secret": "secret",
            "password": "secret",
            "signing_key": "secret",
            "authorization": "secret",
            "credentials": {"user": "u"},
            "title": "incident",
        });
        strip_sensitive_fields(&mut event, "pagerduty");

        let object = event.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("id"));
        assert!(object.contains_key("title"));
    }

    #[test]
    fn strips_nested_and_array_values() {
        let mut event = json!({
            "id": "e1",
            "details": {
                "token": "secret",
                "assignees": [
                    {"name": "alice", "api_key": "secret"},
                    {"name": "bob"}
                ]
            }
        });
        strip_sensitive_fields(&mut event, "pagerduty");

        let details = &event["details"];
        assert!(details.get("token").is_none());
        assert!(details["assignees"][0].get("api_key").is_none());
        assert_eq!(details["assignees"][0]["name"], "alice");
        assert_eq!(details["assignees"][1]["name"], "bob");
    }

    #[test]
    fn integration_deny_list_applies() {
        let mut event = json!({
            "id": "e1",
            "authorizations": [{"user_id": "U1"}],
            "text": "hello",
        });
        strip_sensitive_fields(&mut event, "slack");
        assert!(event.get("authorizations").is_none());
        assert_eq!(event["text"], "hello");

        // The same key survives for other integrations
        let mut event = json!({"authorizations": 1, "id": "e1"});
        strip_sensitive_fields(&mut event, "pagerduty");
        assert!(event.get("authorizations").is_some());
    }

    #[test]
    fn redacts_bearer_and_basic() {
        let message = "request failed: Authorization: Bearer abc.def-123 rejected";
        let redacted = redact_error(message);
        assert!(!redacted.contains("abc.def-123"));
        assert!(redacted.contains("[REDACTED]"));

        let redacted = redact_error("Basic dXNlcjpwYXNz failed");
        assert!(!redacted.contains("dXNlcjpwYXNz"));
    }

    #[test]
    fn redacts_provider_token_shapes() {
        let redacted = redact_error("slack said no: xoxb-1234-abcd");
        assert!(!redacted.contains("xoxb-1234-abcd"));

        let redacted = redact_error("datadog: DD-API-KEY: 0123456789abcdef rejected");
        assert!(!redacted.contains("0123456789abcdef"));

        let redacted = redact_error("pagerduty: Token token=sekrit expired");
        assert!(!redacted.contains("sekrit"));
    }

    #[test]
    fn clean_messages_pass_through() {
        let message = "connection refused (os error 111)";
        assert_eq!(redact_error(message), message);
    }
}
