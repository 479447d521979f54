//! The workflow-engine seam.
//!
//! The runner treats workflows as opaque: an injected `WorkflowAdapter`
//! parses the source bytes and executes the result, reporting step
//! boundaries back through a `StepObserver` so the runner can checkpoint.
//! The engine itself (step interpretation, tool dispatch) lives behind this
//! trait.

use crate::error::{AdapterError, FetchError};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A parsed workflow, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWorkflow {
    /// Path or name identifying the workflow.
    pub name: String,
    /// Ordered step identifiers.
    pub steps: Vec<String>,
    /// The raw source, kept for re-execution on resume.
    pub source: Vec<u8>,
}

/// Receives step-boundary notifications during execution.
///
/// The runner's implementation persists a checkpoint per boundary; the
/// context carries every step output produced so far.
#[async_trait]
pub trait StepObserver: Send + Sync {
    /// Called after each step completes, before the next one starts.
    async fn on_step(&self, step_id: &str, step_index: u32, context: &HashMap<String, JsonValue>);
}

/// Executes parsed workflows.
#[async_trait]
pub trait WorkflowAdapter: Send + Sync {
    /// Parses workflow source bytes.
    ///
    /// # Errors
    ///
    /// Returns `ParseFailed` for malformed source.
    fn parse(&self, name: &str, source: &[u8]) -> Result<ParsedWorkflow, AdapterError>;

    /// Executes a workflow to completion.
    ///
    /// `context` and `start_step` carry the resume point: a fresh run passes
    /// an empty context and step zero. The adapter must skip steps below
    /// `start_step` and report every boundary it crosses to `observer`.
    async fn execute(
        &self,
        workflow: ParsedWorkflow,
        inputs: HashMap<String, JsonValue>,
        context: HashMap<String, JsonValue>,
        start_step: u32,
        observer: Arc<dyn StepObserver>,
    ) -> Result<JsonValue, AdapterError>;
}

/// Fetches workflow source by path, used to resume interrupted runs.
#[async_trait]
pub trait WorkflowFetcher: Send + Sync {
    /// Reads the workflow source at `path`.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches workflows from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: std::path::PathBuf,
}

impl DirectoryFetcher {
    /// Creates a fetcher rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl WorkflowFetcher for DirectoryFetcher {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let full = self.root.join(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(FetchError::ReadFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// An adapter that executes every workflow as a single step echoing its
/// inputs. Stands in for a real workflow engine behind the same seam.
pub struct EchoAdapter;

#[async_trait]
impl WorkflowAdapter for EchoAdapter {
    fn parse(&self, name: &str, source: &[u8]) -> Result<ParsedWorkflow, AdapterError> {
        if source.is_empty() {
            return Err(AdapterError::ParseFailed {
                reason: "workflow source is empty".to_string(),
            });
        }
        Ok(ParsedWorkflow {
            name: name.to_string(),
            steps: vec!["run".to_string()],
            source: source.to_vec(),
        })
    }

    async fn execute(
        &self,
        workflow: ParsedWorkflow,
        inputs: HashMap<String, JsonValue>,
        mut context: HashMap<String, JsonValue>,
        start_step: u32,
        observer: Arc<dyn StepObserver>,
    ) -> Result<JsonValue, AdapterError> {
        if start_step == 0 {
            context.insert(
                "run".to_string(),
                JsonValue::Object(inputs.clone().into_iter().collect()),
            );
            observer.on_step("run", 0, &context).await;
        }
        let _ = workflow;
        Ok(JsonValue::Object(inputs.into_iter().collect()))
    }
}

/// A configurable adapter for tests.
///
/// Parses any source into a workflow whose steps are the configured list,
/// sleeps `step_delay` per step, reports each boundary, and then either
/// fails or returns the configured output.
pub struct MockAdapter {
    steps: Vec<String>,
    step_delay: Duration,
    fail_at: Option<u32>,
    output: JsonValue,
}

impl MockAdapter {
    /// Creates an adapter that succeeds with the given output after a
    /// single step.
    #[must_use]
    pub fn succeeding(output: JsonValue) -> Self {
        Self {
            steps: vec!["step".to_string()],
            step_delay: Duration::ZERO,
            fail_at: None,
            output,
        }
    }

    /// Creates an adapter that fails at the first step.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            steps: vec!["step".to_string()],
            step_delay: Duration::ZERO,
            fail_at: Some(0),
            output: JsonValue::Null,
        }
    }

    /// Sets the step list.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<&str>) -> Self {
        self.steps = steps.into_iter().map(str::to_string).collect();
        self
    }

    /// Sets the per-step delay.
    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Fails when reaching the given step ordinal.
    #[must_use]
    pub fn failing_at(mut self, step: u32) -> Self {
        self.fail_at = Some(step);
        self
    }
}

#[async_trait]
impl WorkflowAdapter for MockAdapter {
    fn parse(&self, name: &str, source: &[u8]) -> Result<ParsedWorkflow, AdapterError> {
        Ok(ParsedWorkflow {
            name: name.to_string(),
            steps: self.steps.clone(),
            source: source.to_vec(),
        })
    }

    async fn execute(
        &self,
        workflow: ParsedWorkflow,
        _inputs: HashMap<String, JsonValue>,
        mut context: HashMap<String, JsonValue>,
        start_step: u32,
        observer: Arc<dyn StepObserver>,
    ) -> Result<JsonValue, AdapterError> {
        for (index, step_id) in workflow.steps.iter().enumerate() {
            let index = index as u32;
            if index < start_step {
                continue;
            }
            if self.step_delay > Duration::ZERO {
                tokio::time::sleep(self.step_delay).await;
            }
            if self.fail_at == Some(index) {
                return Err(AdapterError::StepFailed {
                    step_id: step_id.clone(),
                    reason: "mock failure".to_string(),
                });
            }
            context.insert(step_id.clone(), serde_json::json!({"done": true}));
            observer.on_step(step_id, index, &context).await;
        }
        Ok(self.output.clone())
    }
}

/// An adapter that panics during execution, for failure-containment tests.
pub struct PanickingAdapter;

#[async_trait]
impl WorkflowAdapter for PanickingAdapter {
    fn parse(&self, name: &str, source: &[u8]) -> Result<ParsedWorkflow, AdapterError> {
        Ok(ParsedWorkflow {
            name: name.to_string(),
            steps: vec!["boom".to_string()],
            source: source.to_vec(),
        })
    }

    async fn execute(
        &self,
        _workflow: ParsedWorkflow,
        _inputs: HashMap<String, JsonValue>,
        _context: HashMap<String, JsonValue>,
        _start_step: u32,
        _observer: Arc<dyn StepObserver>,
    ) -> Result<JsonValue, AdapterError> {
        panic!("adapter blew up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingObserver {
        steps: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl StepObserver for RecordingObserver {
        async fn on_step(
            &self,
            step_id: &str,
            step_index: u32,
            _context: &HashMap<String, JsonValue>,
        ) {
            self.steps
                .lock()
                .unwrap()
                .push((step_id.to_string(), step_index));
        }
    }

    #[tokio::test]
    async fn mock_adapter_reports_every_step() {
        let adapter = MockAdapter::succeeding(serde_json::json!({"ok": true}))
            .with_steps(vec!["fetch", "transform", "publish"]);
        let workflow = adapter.parse("w.yaml", b"source").unwrap();

        let observer = Arc::new(RecordingObserver {
            steps: Mutex::new(Vec::new()),
        });
        let output = adapter
            .execute(
                workflow,
                HashMap::new(),
                HashMap::new(),
                0,
                Arc::clone(&observer) as Arc<dyn StepObserver>,
            )
            .await
            .unwrap();

        assert_eq!(output, serde_json::json!({"ok": true}));
        let steps = observer.steps.lock().unwrap();
        assert_eq!(
            *steps,
            vec![
                ("fetch".to_string(), 0),
                ("transform".to_string(), 1),
                ("publish".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn mock_adapter_resumes_past_completed_steps() {
        let adapter = MockAdapter::succeeding(JsonValue::Null)
            .with_steps(vec!["fetch", "transform", "publish"]);
        let workflow = adapter.parse("w.yaml", b"source").unwrap();

        let observer = Arc::new(RecordingObserver {
            steps: Mutex::new(Vec::new()),
        });
        adapter
            .execute(
                workflow,
                HashMap::new(),
                HashMap::new(),
                2,
                Arc::clone(&observer) as Arc<dyn StepObserver>,
            )
            .await
            .unwrap();

        let steps = observer.steps.lock().unwrap();
        assert_eq!(*steps, vec![("publish".to_string(), 2)]);
    }

    #[tokio::test]
    async fn mock_adapter_fails_at_configured_step() {
        let adapter = MockAdapter::succeeding(JsonValue::Null)
            .with_steps(vec!["fetch", "transform"])
            .failing_at(1);
        let workflow = adapter.parse("w.yaml", b"source").unwrap();

        let observer = Arc::new(RecordingObserver {
            steps: Mutex::new(Vec::new()),
        });
        let result = adapter
            .execute(
                workflow,
                HashMap::new(),
                HashMap::new(),
                0,
                observer,
            )
            .await;

        assert!(matches!(result, Err(AdapterError::StepFailed { .. })));
    }

    #[tokio::test]
    async fn directory_fetcher_reads_workflows() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("w.yaml"), b"steps: []")
            .await
            .unwrap();

        let fetcher = DirectoryFetcher::new(dir.path());
        let bytes = fetcher.fetch("w.yaml").await.unwrap();
        assert_eq!(bytes, b"steps: []");

        let missing = fetcher.fetch("missing.yaml").await;
        assert!(matches!(missing, Err(FetchError::NotFound { .. })));
    }
}
