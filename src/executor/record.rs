//! Execution records and their lifecycle state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::arena::ExecutionId;
use crate::detector::ProjectMetadata;
use crate::error::{PipelineError, PipelineResult};

/// Lifecycle state of an execution.
///
/// `Pending -> Running -> {Completed, Failed}`, and `Pending | Running -> Cancelled`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn allowed_transitions(&self) -> &'static [ExecutionState] {
        use ExecutionState::*;
        match self {
            Pending => &[Running, Cancelled],
            Running => &[Completed, Failed, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Category of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// A step reported an error
    StepFailed,
    /// The execution exceeded its time limit
    Timeout,
    /// The backend panicked
    Panicked,
}

/// Error summary captured on a failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl ExecutionError {
    pub fn step_failed(step: Option<String>, message: impl Into<String>) -> Self {
        Self { kind: ExecutionErrorKind::StepFailed, message: message.into(), step }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: ExecutionErrorKind::Timeout,
            message: format!("execution timed out after {} ms", limit.as_millis()),
            step: None,
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self { kind: ExecutionErrorKind::Panicked, message: message.into(), step: None }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ExecutionErrorKind::Timeout
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some(step) => write!(f, "{} (step '{}')", self.message, step),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Output of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub name: String,
    pub output: String,
    pub duration_ms: u64,
}

/// Result of a completed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub summary: String,
    pub steps: Vec<StepOutcome>,
    pub dry_run: bool,
}

/// Options recognised by the executor.
///
/// Unrecognised keys are kept and handed to the backend untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    /// Overrides the configured timeout
    pub timeout: Option<Duration>,

    /// Describe the steps without performing them
    pub dry_run: bool,

    /// Raw option map
    pub raw: Map<String, Value>,
}

impl ExecutionOptions {
    /// Parse and type-check an option map.
    pub fn parse(raw: Map<String, Value>) -> PipelineResult<Self> {
        let timeout = match raw.get("timeout_ms") {
            None | Some(Value::Null) => None,
            Some(value) => {
                let ms = value.as_u64().ok_or_else(|| {
                    PipelineError::invalid_input("option 'timeout_ms' must be a non-negative integer")
                })?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
        };

        let dry_run = match raw.get("dry_run") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(PipelineError::invalid_input("option 'dry_run' must be a boolean")),
        };

        Ok(Self { timeout, dry_run, raw })
    }
}

/// One tracked auto-execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub content: String,
    pub metadata: ProjectMetadata,
    pub options: Map<String, Value>,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl ExecutionRecord {
    pub(crate) fn new(
        id: ExecutionId,
        content: String,
        metadata: ProjectMetadata,
        options: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            content,
            metadata,
            options,
            state: ExecutionState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Move to `target`, stamping timestamps. Returns false for a disallowed transition.
    pub(crate) fn transition(&mut self, target: ExecutionState) -> bool {
        if !self.state.can_transition_to(target) {
            return false;
        }

        let now = Utc::now();
        if target == ExecutionState::Running {
            self.started_at = Some(now);
        }
        if target.is_terminal() {
            self.completed_at = Some(now);
        }
        self.state = target;
        true
    }

    /// The recorded failure as a pipeline error, if the execution failed.
    pub fn failure(&self) -> Option<PipelineError> {
        let error = self.error.as_ref()?;
        Some(PipelineError::ExecutionFailure { id: self.id.to_string(), message: error.to_string() })
    }

    /// Wall-clock time between start and completion (or now, while running).
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - started)
    }
}
