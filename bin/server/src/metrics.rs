//! Prometheus metrics.
//!
//! One registry per controller, exposed in text format at `GET /metrics`
//! and fed by the runner's metrics seam.

use conductor_runner::RunnerMetrics;
use conductor_store::RunStatus;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// The controller's metric set.
pub struct Metrics {
    registry: Registry,
    runs_total: IntCounterVec,
    active_runs: IntGauge,
    webhook_requests: IntCounterVec,
    poll_events_fired: IntCounterVec,
}

impl Metrics {
    /// Creates and registers the controller metrics.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("conductor_runs_total", "Completed runs by terminal status"),
            &["status"],
        )
        .expect("valid metric definition");
        let active_runs = IntGauge::new("conductor_active_runs", "Runs currently in flight")
            .expect("valid metric definition");
        let webhook_requests = IntCounterVec::new(
            Opts::new("conductor_webhook_requests_total", "Webhook requests by outcome"),
            &["outcome"],
        )
        .expect("valid metric definition");
        let poll_events_fired = IntCounterVec::new(
            Opts::new(
                "conductor_poll_events_fired_total",
                "Workflow fires from poll triggers by integration",
            ),
            &["integration"],
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(runs_total.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(active_runs.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(webhook_requests.clone()))
            .expect("metric registers once");
        registry
            .register(Box::new(poll_events_fired.clone()))
            .expect("metric registers once");

        Self {
            registry,
            runs_total,
            active_runs,
            webhook_requests,
            poll_events_fired,
        }
    }

    /// Records a webhook request outcome (`accepted`, `ignored`,
    /// `rejected`).
    pub fn webhook_request(&self, outcome: &str) {
        self.webhook_requests.with_label_values(&[outcome]).inc();
    }

    /// Records poll-trigger workflow fires.
    pub fn poll_events_fired(&self, integration: &str, count: u64) {
        self.poll_events_fired
            .with_label_values(&[integration])
            .inc_by(count);
    }

    /// Renders the registry in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "metrics encoding failed");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerMetrics for Metrics {
    fn run_submitted(&self) {
        self.active_runs.inc();
    }

    fn run_finished(&self, status: RunStatus) {
        self.active_runs.dec();
        self.runs_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lifecycle_updates_gauges_and_counters() {
        let metrics = Metrics::new();
        metrics.run_submitted();
        metrics.run_submitted();
        metrics.run_finished(RunStatus::Succeeded);

        let rendered = metrics.render();
        assert!(rendered.contains("conductor_active_runs 1"));
        assert!(rendered.contains("conductor_runs_total{status=\"succeeded\"} 1"));
    }

    #[test]
    fn webhook_outcomes_are_labelled() {
        let metrics = Metrics::new();
        metrics.webhook_request("accepted");
        metrics.webhook_request("accepted");
        metrics.webhook_request("rejected");

        let rendered = metrics.render();
        assert!(rendered.contains("conductor_webhook_requests_total{outcome=\"accepted\"} 2"));
        assert!(rendered.contains("conductor_webhook_requests_total{outcome=\"rejected\"} 1"));
    }
}
