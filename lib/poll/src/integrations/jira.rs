//! Jira issue polling via JQL search.
//!
//! The JQL expression is assembled exclusively from validated tokens with
//! quoted literals; caller strings are never concatenated verbatim.

use super::{execute_json, http_client};
use crate::error::PollError;
use crate::poller::{IntegrationPoller, PollOutcome, PollQuery};
use crate::state::PollState;
use crate::validate::quote_jql_literal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Polls the Jira search API for recently-updated issues.
pub struct JiraPoller {
    client: reqwest::Client,
    email: String,
    token: String,
    base_url: String,
}

impl JiraPoller {
    /// Creates a poller with explicit credentials.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            email: email.into(),
            token: token.into(),
            base_url: base_url.into(),
        }
    }

    /// Builds the poller from `JIRA_EMAIL`, `JIRA_API_TOKEN`, and
    /// `JIRA_BASE_URL`, if all are set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let email = std::env::var("JIRA_EMAIL").ok()?;
        let token = std::env::var("JIRA_API_TOKEN").ok()?;
        let base_url = std::env::var("JIRA_BASE_URL").ok()?;
        Some(Self::new(email, token, base_url))
    }
}

/// Builds the JQL expression from validated query tokens.
fn build_jql(since: DateTime<Utc>, query: &PollQuery) -> String {
    let mut clauses = vec![format!("updated >= {}", quote_jql_literal(&since.format("%Y/%m/%d %H:%M").to_string()))];

    for (key, field) in [
        ("project", "project"),
        ("assignee", "assignee"),
        ("status", "status"),
    ] {
        if let Some(value) = query.get(key).and_then(JsonValue::as_str) {
            clauses.push(format!("{field} = {}", quote_jql_literal(value)));
        }
    }
    if let Some(JsonValue::Array(labels)) = query.get("labels") {
        let quoted: Vec<String> = labels
            .iter()
            .filter_map(JsonValue::as_str)
            .map(quote_jql_literal)
            .collect();
        if !quoted.is_empty() {
            clauses.push(format!("labels in ({})", quoted.join(", ")));
        }
    }

    format!("{} ORDER BY updated ASC", clauses.join(" AND "))
}

#[async_trait]
impl IntegrationPoller for JiraPoller {
    fn name(&self) -> &'static str {
        "jira"
    }

    async fn poll(&self, state: &PollState, query: &PollQuery) -> Result<PollOutcome, PollError> {
        let jql = build_jql(state.last_poll_time, query);
        let request = self
            .client
            .get(format!("{}/rest/api/2/search", self.base_url))
            .basic_auth(&self.email, Some(&self.token))
            .query(&[("jql", jql.as_str()), ("maxResults", "100")]);

        let body = execute_json("jira", request).await?;
        let events = body
            .get("issues")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(PollOutcome {
            events,
            cursor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state() -> PollState {
        PollState::new(
            "w.yaml:jira",
            "w.yaml",
            "jira",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap(),
        )
    }

    #[test]
    fn jql_is_built_from_quoted_tokens() {
        let mut query = PollQuery::new();
        query.insert("project".to_string(), serde_json::json!("OPS"));
        query.insert("assignee".to_string(), serde_json::json!("alice.smith"));

        let jql = build_jql(Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap(), &query);
        assert!(jql.starts_with("updated >= \"2024/06/01 12:30\""));
        assert!(jql.contains("project = \"OPS\""));
        assert!(jql.contains("assignee = \"alice.smith\""));
        assert!(jql.ends_with("ORDER BY updated ASC"));
    }

    #[test]
    fn jql_quotes_hostile_literals() {
        // Registration-time validation rejects this value; even if it got
        // through, quoting keeps it inert.
        let mut query = PollQuery::new();
        query.insert("assignee".to_string(), serde_json::json!("a\" OR \"1\"=\"1"));

        let jql = build_jql(Utc::now(), &query);
        assert!(jql.contains(r#"assignee = "a\" OR \"1\"=\"1""#));
    }

    #[test]
    fn jql_includes_label_lists() {
        let mut query = PollQuery::new();
        query.insert("labels".to_string(), serde_json::json!(["prod", "urgent"]));

        let jql = build_jql(Utc::now(), &query);
        assert!(jql.contains(r#"labels in ("prod", "urgent")"#));
    }

    #[tokio::test]
    async fn polls_search_endpoint_with_jql() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .and(query_param("maxResults", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issues": [
                    {"id": "10001", "key": "OPS-1", "fields": {"summary": "fix it"}}
                ]
            })))
            .mount(&server)
            .await;

        let poller = JiraPoller::new("me@example.com", "jira-token", server.uri());
        let outcome = poller.poll(&state(), &PollQuery::new()).await.unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0]["key"], "OPS-1");
    }
}
