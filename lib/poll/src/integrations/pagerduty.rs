//! PagerDuty incident polling.

use super::{execute_json, http_client};
use crate::error::PollError;
use crate::poller::{IntegrationPoller, PollOutcome, PollQuery};
use crate::state::PollState;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

const DEFAULT_BASE_URL: &str = "https://api.pagerduty.com";

/// Polls the PagerDuty incidents API.
pub struct PagerDutyPoller {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl PagerDutyPoller {
    /// Creates a poller with an explicit token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Builds the poller from `PAGERDUTY_TOKEN`, if set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("PAGERDUTY_TOKEN").ok().map(Self::new)
    }

    /// Overrides the API base URL (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl IntegrationPoller for PagerDutyPoller {
    fn name(&self) -> &'static str {
        "pagerduty"
    }

    async fn poll(&self, state: &PollState, query: &PollQuery) -> Result<PollOutcome, PollError> {
        let mut request = self
            .client
            .get(format!("{}/incidents", self.base_url))
            .header("Authorization", format!("Token token={}", self.token))
            .header("Accept", "application/vnd.pagerduty+json;version=2")
            .query(&[
                ("since", state.last_poll_time.to_rfc3339()),
                ("sort_by", "created_at:asc".to_string()),
                ("limit", "100".to_string()),
            ]);

        for (key, param) in [("statuses", "statuses[]"), ("service_ids", "service_ids[]")] {
            if let Some(JsonValue::Array(values)) = query.get(key) {
                for value in values {
                    if let Some(value) = value.as_str() {
                        request = request.query(&[(param, value)]);
                    }
                }
            }
        }

        let body = execute_json("pagerduty", request).await?;
        let events = body
            .get("incidents")
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
    use chrono::Utc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state() -> PollState {
        PollState::new(
            "w.yaml:pagerduty",
            "w.yaml",
            "pagerduty",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn polls_incidents_since_last_poll_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents"))
            .and(header("Authorization", "Token token=pd-token"))
            .and(query_param("since", "2024-06-01T12:00:00+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "incidents": [
                    {"id": "P1", "title": "db down", "created_at": "2024-06-01T12:05:00Z"},
                    {"id": "P2", "title": "disk full", "created_at": "2024-06-01T12:06:00Z"}
                ]
            })))
            .mount(&server)
            .await;

        let poller = PagerDutyPoller::new("pd-token").with_base_url(server.uri());
        let outcome = poller.poll(&state(), &PollQuery::new()).await.unwrap();

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0]["id"], "P1");
    }

    #[tokio::test]
    async fn list_query_parameters_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents"))
            .and(query_param("statuses[]", "triggered"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"incidents": []})),
            )
            .mount(&server)
            .await;

        let poller = PagerDutyPoller::new("pd-token").with_base_url(server.uri());
        let mut query = PollQuery::new();
        query.insert("statuses".to_string(), serde_json::json!(["triggered"]));

        let outcome = poller.poll(&state(), &query).await.unwrap();
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn http_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .mount(&server)
            .await;

        let poller = PagerDutyPoller::new("pd-token").with_base_url(server.uri());
        let result = poller.poll(&state(), &PollQuery::new()).await;
        assert_eq!(
            result,
            Err(PollError::RateLimitedByIntegration {
                retry_after_secs: Some(120)
            })
        );
    }

    #[tokio::test]
    async fn http_401_maps_to_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let poller = PagerDutyPoller::new("bad-token").with_base_url(server.uri());
        let result = poller.poll(&state(), &PollQuery::new()).await;
        assert!(matches!(result, Err(PollError::AuthFailed { .. })));
    }

    #[tokio::test]
    async fn http_500_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/incidents"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let poller = PagerDutyPoller::new("pd-token").with_base_url(server.uri());
        let result = poller.poll(&state(), &PollQuery::new()).await;
        assert!(matches!(result, Err(PollError::Transient { .. })));
    }
}
