//! Pluggable step execution.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::arena::ExecutionId;
use crate::detector::{ProjectMetadata, WorkItem};

/// A unit of work planned for an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStep {
    /// Position in the plan
    pub index: usize,

    /// Display name
    pub name: String,

    /// Work item the step was planned from, if any
    pub work_item: Option<WorkItem>,
}

/// Plan one step per declared work item, or a single `project` step.
pub fn plan_steps(metadata: &ProjectMetadata) -> Vec<ExecutionStep> {
    if metadata.work_items.is_empty() {
        return vec![ExecutionStep { index: 0, name: "project".to_string(), work_item: None }];
    }

    metadata
        .work_items
        .iter()
        .enumerate()
        .map(|(index, item)| ExecutionStep {
            index,
            name: format!("{}: {}", item.kind, item.title),
            work_item: Some(item.clone()),
        })
        .collect()
}

/// Everything a backend may need while running steps.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: ExecutionId,
    pub content: String,
    pub metadata: ProjectMetadata,
    pub options: Map<String, Value>,
    pub dry_run: bool,
}

/// Performs the steps of an execution.
///
/// Returning `Err` fails the execution at that step. Panics are contained
/// and recorded as failures.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Backend name, reported in component status.
    fn name(&self) -> &str;

    /// Run one step and return its output.
    async fn run_step(&self, step: &ExecutionStep, ctx: &StepContext) -> Result<String, String>;
}

/// In-process backend that walks the planned work items.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    step_delay: Duration,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` in every step.
    pub fn with_step_delay(delay: Duration) -> Self {
        Self { step_delay: delay }
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn run_step(&self, step: &ExecutionStep, ctx: &StepContext) -> Result<String, String> {
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }

        let subject = match &step.work_item {
            Some(item) => item.to_string(),
            None if ctx.metadata.name.is_empty() => "project".to_string(),
            None => format!("project '{}'", ctx.metadata.name),
        };

        tracing::debug!(id = %ctx.execution_id, step = %step.name, "Running step");

        if ctx.dry_run {
            Ok(format!("DRY RUN: would process {}", subject))
        } else {
            Ok(format!("processed {}", subject))
        }
    }
}
