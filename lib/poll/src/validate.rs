//! Query parameter validation.
//!
//! Poll-trigger queries feed integration-specific query construction (JQL,
//! URL parameters), so every string value is validated before a trigger is
//! accepted. The base charset is `[A-Za-z0-9_-]`; keys that look like
//! usernames additionally allow space and period. List elements are
//! validated individually.

use crate::error::PollError;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Key substrings that mark a field as username-like.
const USERNAME_KEY_HINTS: &[&str] = &["user", "assignee", "mention", "name"];

fn is_username_key(key: &str) -> bool {
    let key = key.to_lowercase();
    USERNAME_KEY_HINTS.iter().any(|hint| key.contains(hint))
}

fn is_valid_token(value: &str, allow_extended: bool) -> bool {
    !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || c == '_'
                || c == '-'
                || (allow_extended && (c == ' ' || c == '.'))
        })
}

fn validate_string(key: &str, value: &str) -> Result<(), PollError> {
    if is_valid_token(value, is_username_key(key)) {
        Ok(())
    } else {
        Err(PollError::InvalidQuery {
            reason: format!("query parameter '{key}' has an invalid value"),
        })
    }
}

/// Validates every string value in a trigger query.
///
/// # Errors
///
/// Returns `InvalidQuery` naming the offending key. Values carry no
/// further detail so an attacker-controlled string never round-trips into
/// logs.
pub fn validate_query(query: &HashMap<String, JsonValue>) -> Result<(), PollError> {
    for (key, value) in query {
        if !is_valid_token(key, false) {
            return Err(PollError::InvalidQuery {
                reason: format!("query key '{key}' is not a valid identifier"),
            });
        }
        match value {
            JsonValue::String(s) => validate_string(key, s)?,
            JsonValue::Array(items) => {
                for item in items {
                    match item {
                        JsonValue::String(s) => validate_string(key, s)?,
                        JsonValue::Number(_) | JsonValue::Bool(_) => {}
                        _ => {
                            return Err(PollError::InvalidQuery {
                                reason: format!("query parameter '{key}' has a non-scalar element"),
                            })
                        }
                    }
                }
            }
            JsonValue::Number(_) | JsonValue::Bool(_) => {}
            _ => {
                return Err(PollError::InvalidQuery {
                    reason: format!("query parameter '{key}' must be a scalar or list"),
                })
            }
        }
    }
    Ok(())
}

/// Quotes a validated literal for embedding in a JQL expression.
///
/// Values must already have passed [`validate_query`]; quoting is belt and
/// suspenders for the extended username charset.
#[must_use]
pub fn quote_jql_literal(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
