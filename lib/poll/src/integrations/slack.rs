//! Slack channel-history polling.

use super::{execute_json, http_client};
use crate::error::PollError;
use crate::poller::{IntegrationPoller, PollOutcome, PollQuery};
use crate::state::PollState;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// Polls `conversations.history` for new messages in a channel.
pub struct SlackPoller {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackPoller {
    /// Creates a poller with an explicit bot token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Builds the poller from `SLACK_BOT_TOKEN`, if set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("SLACK_BOT_TOKEN").ok().map(Self::new)
    }

    /// Overrides the API base URL (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Slack reports failures as `ok: false` in a 200 body.
fn classify_slack_error(error: &str) -> PollError {
    match error {
        "ratelimited" => PollError::RateLimitedByIntegration {
            retry_after_secs: None,
        },
        "invalid_auth" | "not_authed" | "token_revoked" | "account_inactive" => {
            PollError::AuthFailed {
                reason: format!("slack returned {error}"),
            }
        }
        other => PollError::Transient {
            reason: format!("slack returned {other}"),
        },
    }
}

#[async_trait]
impl IntegrationPoller for SlackPoller {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn poll(&self, state: &PollState, query: &PollQuery) -> Result<PollOutcome, PollError> {
        let channel = query
            .get("channel")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| PollError::InvalidQuery {
                reason: "slack triggers require a 'channel' query parameter".to_string(),
            })?;

        let oldest = format!(
            "{}.{:06}",
            state.last_poll_time.timestamp(),
            state.last_poll_time.timestamp_subsec_micros()
        );
        let request = self
            .client
            .get(format!("{}/conversations.history", self.base_url))
            .bearer_auth(&self.token)
            .query(&[
                ("channel", channel),
                ("oldest", oldest.as_str()),
                ("limit", "100"),
            ]);

        let body = execute_json("slack", request).await?;
        if body.get("ok").and_then(JsonValue::as_bool) != Some(true) {
            let error = body
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown_error");
            return Err(classify_slack_error(error));
        }

        // Messages carry no id field; synthesize one from channel + ts,
        // which Slack documents as unique per channel.
        let events = body
            .get("messages")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|mut message| {
                let ts = message.get("ts").and_then(JsonValue::as_str)?.to_string();
                if let Some(object) = message.as_object_mut() {
                    object.insert(
                        "id".to_string(),
                        JsonValue::String(format!("{channel}:{ts}")),
                    );
                    object.insert("channel".to_string(), JsonValue::String(channel.to_string()));
                }
                Some(message)
            })
            .collect();

        let cursor = body
            .get("response_metadata")
            .and_then(|m| m.get("next_cursor"))
            .and_then(JsonValue::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(PollOutcome { events, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state() -> PollState {
        PollState::new(
            "w.yaml:slack",
            "w.yaml",
            "slack",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    fn channel_query() -> PollQuery {
        let mut query = PollQuery::new();
        query.insert("channel".to_string(), serde_json::json!("C123"));
        query
    }

    #[tokio::test]
    async fn synthesizes_event_ids_from_channel_and_ts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("channel", "C123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [
                    {"ts": "1717243500.000100", "text": "deploy?", "user": "U1"},
                    {"ts": "1717243560.000200", "text": "ship it", "user": "U2"}
                ]
            })))
            .mount(&server)
            .await;

        let poller = SlackPoller::new("xoxb-token").with_base_url(server.uri());
        let outcome = poller.poll(&state(), &channel_query()).await.unwrap();

        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0]["id"], "C123:1717243500.000100");
        assert_eq!(outcome.events[0]["channel"], "C123");
    }

    #[tokio::test]
    async fn missing_channel_is_invalid_query() {
        let poller = SlackPoller::new("xoxb-token");
        let result = poller.poll(&state(), &PollQuery::new()).await;
        assert!(matches!(result, Err(PollError::InvalidQuery { .. })));
    }

    #[tokio::test]
    async fn ok_false_ratelimited_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "ratelimited"
            })))
            .mount(&server)
            .await;

        let poller = SlackPoller::new("xoxb-token").with_base_url(server.uri());
        let result = poller.poll(&state(), &channel_query()).await;
        assert!(matches!(
            result,
            Err(PollError::RateLimitedByIntegration { .. })
        ));
    }

    #[tokio::test]
    async fn ok_false_invalid_auth_maps_to_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false,
                "error": "invalid_auth"
            })))
            .mount(&server)
            .await;

        let poller = SlackPoller::new("xoxb-bad").with_base_url(server.uri());
        let result = poller.poll(&state(), &channel_query()).await;
        assert!(matches!(result, Err(PollError::AuthFailed { .. })));
    }
}
