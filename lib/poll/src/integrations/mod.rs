//! Integration pollers.
//!
//! One module per third-party service. Pollers are constructed from
//! environment-provided credentials at startup; a missing credential
//! disables that poller with a log line rather than failing the process.

pub mod datadog;
pub mod jira;
pub mod pagerduty;
pub mod slack;

pub use datadog::DatadogPoller;
pub use jira::JiraPoller;
pub use pagerduty::PagerDutyPoller;
pub use slack::SlackPoller;

use crate::error::PollError;
use crate::poller::IntegrationPoller;
use crate::sanitize::redact_error;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for outbound integration requests.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("reqwest client builds with static options")
}

/// Sends a request and classifies the response: 429 with its `Retry-After`,
/// 401/403 as auth failures, other non-2xx and transport errors as
/// transient. Error strings pass through credential redaction.
pub(crate) async fn execute_json(
    integration: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<JsonValue, PollError> {
    let response = request.send().await.map_err(|e| PollError::Transient {
        reason: redact_error(&e.to_string()),
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        return Err(PollError::RateLimitedByIntegration { retry_after_secs });
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PollError::AuthFailed {
            reason: format!("{integration} returned {status}"),
        });
    }
    if !status.is_success() {
        return Err(PollError::Transient {
            reason: format!("{integration} returned {status}"),
        });
    }

    response.json().await.map_err(|e| PollError::Transient {
        reason: redact_error(&e.to_string()),
    })
}

/// Builds every poller whose credentials are present in the environment.
#[must_use]
pub fn pollers_from_env() -> Vec<Arc<dyn IntegrationPoller>> {
    let mut pollers: Vec<Arc<dyn IntegrationPoller>> = Vec::new();

    match PagerDutyPoller::from_env() {
        Some(poller) => pollers.push(Arc::new(poller)),
        None => tracing::info!("pagerduty poller disabled: PAGERDUTY_TOKEN not set"),
    }
    match SlackPoller::from_env() {
        Some(poller) => pollers.push(Arc::new(poller)),
        None => tracing::info!("slack poller disabled: SLACK_BOT_TOKEN not set"),
    }
    match JiraPoller::from_env() {
        Some(poller) => pollers.push(Arc::new(poller)),
        None => {
            tracing::info!("jira poller disabled: JIRA_EMAIL/JIRA_API_TOKEN/JIRA_BASE_URL not set");
        }
    }
    match DatadogPoller::from_env() {
        Some(poller) => pollers.push(Arc::new(poller)),
        None => tracing::info!("datadog poller disabled: DATADOG_API_KEY/DATADOG_APP_KEY not set"),
    }

    pollers
}
