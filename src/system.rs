//! The assembled pipeline.
//!
//! [`BmadSystem`] wires the configuration store, detector, interceptor,
//! prompt modifier and auto executor together and exposes the operations a
//! boundary layer (the `bmad` binary, an HTTP adapter) needs. It is an
//! ordinary value: construct one per process and share it by reference.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{keys, ConfigStats, ConfigStore, ValidationResult};
use crate::detector::{DetectionResult, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::executor::{
    AutoExecutor, CancelOutcome, ExecutionBackend, ExecutionCounts, ExecutionId,
    ExecutionOptions, ExecutionRecord, LocalBackend,
};
use crate::interceptor::{InterceptDecision, Interceptor};
use crate::modifier::{PromptModifier, ResponseTemplates};

/// Health of one pipeline component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub healthy: bool,
    pub detail: String,
}

impl ComponentStatus {
    fn healthy(name: &str, detail: impl Into<String>) -> Self {
        Self { name: name.to_string(), healthy: true, detail: detail.into() }
    }

    fn unhealthy(name: &str, detail: impl Into<String>) -> Self {
        Self { name: name.to_string(), healthy: false, detail: detail.into() }
    }
}

/// Snapshot of component health and executor statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: String,
    pub execution_enabled: bool,
    pub components: Vec<ComponentStatus>,
    pub executions: ExecutionCounts,
}

impl SystemStatus {
    /// Whether every component reports healthy.
    pub fn is_healthy(&self) -> bool {
        self.components.iter().all(|c| c.healthy)
    }
}

/// Aggregate execution counts and configuration counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub executions: ExecutionCounts,
    pub config: ConfigStats,
}

/// Outcome of running content through the full pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub detection: DetectionResult,
    pub decision: InterceptDecision,

    /// Content forwarded downstream: modified when executed, original otherwise
    pub content: String,

    /// Whether guardrails were inserted
    pub modified: bool,

    /// Created execution, when the content was executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,
}

/// The BMAD execution pipeline.
#[derive(Debug, Clone)]
pub struct BmadSystem {
    config: Arc<ConfigStore>,
    detector: Option<Detector>,
    interceptor: Interceptor,
    modifier: PromptModifier,
    executor: AutoExecutor,
}

impl BmadSystem {
    /// Build the pipeline with the local backend, configured from `config`.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let step_delay = config
            .get(keys::EXECUTION_STEP_DELAY_MS)
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or_default();
        Self::with_backend(config, Arc::new(LocalBackend::with_step_delay(step_delay)))
    }

    /// Build the pipeline around a custom execution backend.
    pub fn with_backend(config: Arc<ConfigStore>, backend: Arc<dyn ExecutionBackend>) -> Self {
        let executor = AutoExecutor::from_config(backend, Arc::clone(&config));
        Self {
            config,
            detector: None,
            interceptor: Interceptor::new(),
            modifier: PromptModifier::new(),
            executor,
        }
    }

    /// Use a fixed detector instead of one built from configuration.
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Use a custom interceptor.
    pub fn with_interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn executor(&self) -> &AutoExecutor {
        &self.executor
    }

    fn detector(&self) -> PipelineResult<Detector> {
        match &self.detector {
            Some(detector) => Ok(detector.clone()),
            None => Detector::from_config(&self.config),
        }
    }

    /// Component health and executor statistics.
    pub fn status(&self) -> SystemStatus {
        let config = match self.config.path() {
            Some(path) => ComponentStatus::healthy("config", format!("backed by {}", path.display())),
            None => ComponentStatus::healthy("config", "in memory"),
        };

        let detector = match self.detector() {
            Ok(detector) => {
                ComponentStatus::healthy("detector", format!("{} rules", detector.rules().len()))
            }
            Err(e) => ComponentStatus::unhealthy("detector", e.to_string()),
        };

        let modifier = match serde_json::from_value::<ResponseTemplates>(self.config.templates()) {
            Ok(templates) => ComponentStatus::healthy(
                "modifier",
                format!("{} guardrails", templates.guardrails.len()),
            ),
            Err(e) => ComponentStatus::unhealthy("modifier", format!("malformed templates: {}", e)),
        };

        let counts = self.executor.counts();
        let executor = ComponentStatus::healthy(
            "executor",
            format!(
                "backend '{}', {}/{} running",
                self.executor.backend_name(),
                counts.running,
                self.executor.settings().max_concurrent
            ),
        );

        SystemStatus {
            version: crate::VERSION.to_string(),
            execution_enabled: self.config.execution_mode(),
            components: vec![
                config,
                detector,
                ComponentStatus::healthy("interceptor", "ready"),
                modifier,
                executor,
            ],
            executions: counts,
        }
    }

    /// Full configuration tree.
    pub fn config_all(&self) -> Value {
        self.config.get_all()
    }

    /// Value at a dotted path.
    pub fn config_get(&self, path: &str) -> Option<Value> {
        self.config.get(path)
    }

    /// Set a value at a dotted path. Not persisted until [`save_config`](Self::save_config).
    pub fn config_set(&self, path: &str, value: Value) -> PipelineResult<()> {
        self.config.set(path, value)
    }

    pub fn save_config(&self) -> PipelineResult<()> {
        self.config.save_config()
    }

    /// Run detection only. No counters or records are touched.
    pub fn detect(&self, content: &str) -> PipelineResult<DetectionResult> {
        Ok(self.detector()?.detect_bmad(content))
    }

    /// Run the interceptor, modifier and executor chain.
    ///
    /// Must be called from within a Tokio runtime when execution mode is on.
    pub fn execute(&self, content: &str, options: Map<String, Value>) -> PipelineResult<ExecuteResponse> {
        if content.trim().is_empty() {
            return Err(PipelineError::invalid_input("content must not be empty"));
        }
        ExecutionOptions::parse(options.clone())?;

        let detection = self.detector()?.detect_bmad(content);
        let decision = self.interceptor.intercept(content, &detection, self.config.execution_mode());

        let response = match decision {
            InterceptDecision::Execute => {
                let templates = ResponseTemplates::from_value(&self.config.templates());
                let prompt = self.modifier.modify(content, &detection, &templates);
                let record =
                    self.executor.execute_project(&prompt.content, detection.metadata.clone(), options)?;
                self.config.increment_counter("detections");
                self.config.increment_counter("executions");
                ExecuteResponse {
                    detection,
                    decision,
                    content: prompt.content,
                    modified: prompt.applied,
                    execution: Some(record),
                }
            }
            InterceptDecision::PassThrough(reason) => {
                tracing::debug!(reason = %reason, "Content passed through");
                self.config.increment_counter("detections");
                self.config.increment_counter("passthroughs");
                ExecuteResponse {
                    detection,
                    decision,
                    content: content.to_string(),
                    modified: false,
                    execution: None,
                }
            }
        };

        self.config.touch();
        Ok(response)
    }

    /// Execution counts and configuration counters.
    pub fn stats(&self) -> Statistics {
        Statistics { executions: self.executor.counts(), config: self.config.get_stats() }
    }

    /// Look up an execution by id.
    pub fn execution(&self, id: &str) -> PipelineResult<ExecutionRecord> {
        self.executor.find(id).ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    /// All executions in creation order.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.executor.get_all_executions()
    }

    /// Cancel an execution by id.
    pub fn cancel(&self, id: &str) -> PipelineResult<CancelOutcome> {
        let id: ExecutionId = id.parse()?;
        self.executor.cancel(id)
    }

    /// Wait for an execution to finish.
    pub async fn wait(&self, id: &str) -> PipelineResult<ExecutionRecord> {
        let parsed: ExecutionId = id.parse()?;
        self.executor.wait_for(parsed).await.ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    /// Flip the execution-mode flag and persist it. Returns the new value.
    ///
    /// In-memory stores keep the change without persisting.
    pub fn toggle_execution_mode(&self) -> PipelineResult<bool> {
        let enabled = self.config.toggle_execution_mode();
        if self.config.path().is_some() {
            if let Err(e) = self.config.save_config() {
                // Keep memory in line with what is on disk.
                self.config.set_execution_mode(!enabled);
                return Err(e);
            }
        }
        Ok(enabled)
    }

    pub fn validate_response(&self, response: &Value) -> ValidationResult {
        self.config.validate_execution_response(response)
    }

    /// Configured response templates.
    pub fn templates(&self) -> Value {
        self.config.templates()
    }
}
