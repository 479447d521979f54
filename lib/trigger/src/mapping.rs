//! Payload-to-input mapping.
//!
//! Webhook routes may carry a mapping table from input names to either
//! literal strings or `$.dot.path` expressions evaluated against the
//! payload. Expressions are compiled once at route registration; a path
//! that misses maps to JSON null rather than failing the request.

use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A compiled mapping expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingExpr {
    /// A literal string copied into the inputs verbatim.
    Literal(String),
    /// A dot path into the payload. Numeric segments index arrays.
    Path(Vec<String>),
}

impl MappingExpr {
    /// Compiles a mapping value. Anything starting with `$.` is a path;
    /// everything else is a literal.
    #[must_use]
    pub fn compile(value: &str) -> Self {
        match value.strip_prefix("$.") {
            Some(path) => Self::Path(path.split('.').map(str::to_string).collect()),
            None => Self::Literal(value.to_string()),
        }
    }

    /// Evaluates the expression against a payload.
    ///
    /// A missing or mismatched path yields `JsonValue::Null`.
    #[must_use]
    pub fn apply(&self, payload: &JsonValue) -> JsonValue {
        match self {
            Self::Literal(text) => JsonValue::String(text.clone()),
            Self::Path(segments) => {
                let mut current = payload;
                for segment in segments {
                    current = match current {
                        JsonValue::Object(map) => match map.get(segment) {
                            Some(value) => value,
                            None => return JsonValue::Null,
                        },
                        JsonValue::Array(items) => match segment
                            .parse::<usize>()
                            .ok()
                            .and_then(|index| items.get(index))
                        {
                            Some(value) => value,
                            None => return JsonValue::Null,
                        },
                        _ => return JsonValue::Null,
                    };
                }
                current.clone()
            }
        }
    }
}

/// A mapping table compiled at registration time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputMapping {
    entries: Vec<(String, MappingExpr)>,
}

impl InputMapping {
    /// Compiles a raw key -> expression table.
    #[must_use]
    pub fn compile(raw: &HashMap<String, String>) -> Self {
        let mut entries: Vec<(String, MappingExpr)> = raw
            .iter()
            .map(|(key, value)| (key.clone(), MappingExpr::compile(value)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// Returns true when no mapping entries are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies every entry against the payload.
    #[must_use]
    pub fn apply(&self, payload: &JsonValue) -> HashMap<String, JsonValue> {
        self.entries
            .iter()
            .map(|(key, expr)| (key.clone(), expr.apply(payload)))
            .collect()
    }
}

/// Flattens a payload's top level into inputs, used when a route has no
/// mapping table. Non-object payloads flatten to nothing.
#[must_use]
pub fn flatten_top_level(payload: &JsonValue) -> HashMap<String, JsonValue> {
    match payload {
        JsonValue::Object(map) => map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => HashMap::new(),
    }
}
