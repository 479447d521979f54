//! Datadog event-stream polling.

use super::{execute_json, http_client};
use crate::error::PollError;
use crate::poller::{IntegrationPoller, PollOutcome, PollQuery};
use crate::state::PollState;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

const DEFAULT_SITE: &str = "datadoghq.com";

/// Polls the Datadog events API.
pub struct DatadogPoller {
    client: reqwest::Client,
    api_key: String,
    app_key: String,
    base_url: String,
}

impl DatadogPoller {
    /// Creates a poller with explicit keys against a site.
    #[must_use]
    pub fn new(api_key: impl Into<String>, app_key: impl Into<String>, site: &str) -> Self {
        Self {
            client: http_client(),
            api_key: api_key.into(),
            app_key: app_key.into(),
            base_url: format!("https://api.{site}"),
        }
    }

    /// Builds the poller from `DATADOG_API_KEY`, `DATADOG_APP_KEY`, and
    /// the optional `DATADOG_SITE`, if the keys are set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("DATADOG_API_KEY").ok()?;
        let app_key = std::env::var("DATADOG_APP_KEY").ok()?;
        let site = std::env::var("DATADOG_SITE").unwrap_or_else(|_| DEFAULT_SITE.to_string());
        Some(Self::new(api_key, app_key, &site))
    }

    /// Overrides the API base URL (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl IntegrationPoller for DatadogPoller {
    fn name(&self) -> &'static str {
        "datadog"
    }

    async fn poll(&self, state: &PollState, query: &PollQuery) -> Result<PollOutcome, PollError> {
        let start = state.last_poll_time.timestamp().to_string();
        let end = chrono::Utc::now().timestamp().to_string();
        let mut request = self
            .client
            .get(format!("{}/api/v1/events", self.base_url))
            .header("DD-API-KEY", &self.api_key)
            .header("DD-APPLICATION-KEY", &self.app_key)
            .query(&[("start", start.as_str()), ("end", end.as_str())]);

        if let Some(priority) = query.get("priority").and_then(JsonValue::as_str) {
            request = request.query(&[("priority", priority)]);
        }
        if let Some(JsonValue::Array(tags)) = query.get("tags") {
            let tags: Vec<&str> = tags.iter().filter_map(JsonValue::as_str).collect();
            if !tags.is_empty() {
                request = request.query(&[("tags", tags.join(",").as_str())]);
            }
        }

        let body = execute_json("datadog", request).await?;
        let events = body
            .get("events")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(PollOutcome {
            events,
            cursor: None,
        })
    }
}
