//! Routing decision between pass-through and modify-and-execute.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detector::DetectionResult;

/// Why content was passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReason {
    /// Content was empty or whitespace
    EmptyContent,
    /// Execution mode is switched off
    ExecutionDisabled,
    /// Content is not a BMAD project
    NotBmad,
    /// Detection matched but below the required confidence
    LowConfidence,
}

impl fmt::Display for PassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyContent => write!(f, "content is empty"),
            Self::ExecutionDisabled => write!(f, "execution mode is disabled"),
            Self::NotBmad => write!(f, "content is not a BMAD project"),
            Self::LowConfidence => write!(f, "detection confidence is too low"),
        }
    }
}

/// Routing decision for a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "reason", rename_all = "snake_case")]
pub enum InterceptDecision {
    /// Modify the content and start a tracked execution
    Execute,
    /// Forward the content unchanged
    PassThrough(PassReason),
}

impl InterceptDecision {
    /// Whether the content should be executed.
    pub fn should_execute(&self) -> bool {
        matches!(self, Self::Execute)
    }
}

/// Decides whether detected content is auto-executed.
///
/// The decision depends only on its inputs; the execution-mode flag is read
/// by the caller and passed in.
#[derive(Debug, Clone, Default)]
pub struct Interceptor {
    min_confidence: f64,
}

impl Interceptor {
    /// Create an interceptor that trusts the detector's verdict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Additionally require a minimum confidence before executing.
    pub fn with_min_confidence(min_confidence: f64) -> Self {
        Self { min_confidence: min_confidence.clamp(0.0, 1.0) }
    }

    /// Decide how to route the content.
    pub fn intercept(
        &self,
        content: &str,
        detection: &DetectionResult,
        execution_enabled: bool,
    ) -> InterceptDecision {
        let decision = if content.trim().is_empty() {
            InterceptDecision::PassThrough(PassReason::EmptyContent)
        } else if !detection.is_bmad {
            InterceptDecision::PassThrough(PassReason::NotBmad)
        } else if detection.confidence < self.min_confidence {
            InterceptDecision::PassThrough(PassReason::LowConfidence)
        } else if !execution_enabled {
            InterceptDecision::PassThrough(PassReason::ExecutionDisabled)
        } else {
            InterceptDecision::Execute
        };

        tracing::debug!(
            decision = ?decision,
            confidence = detection.confidence,
            execution_enabled,
            "Interception decision"
        );
        decision
    }
}
