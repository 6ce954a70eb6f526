//! Pipeline error types.

use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors reported synchronously by pipeline operations.
///
/// Failures inside a running execution are not raised through this type;
/// they are recorded on the affected execution record instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or malformed caller-supplied content or options.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown execution id.
    #[error("Execution not found: {0}")]
    NotFound(String),

    /// Persistence failure or invalid configuration path.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A specific execution failed.
    #[error("Execution '{id}' failed: {message}")]
    ExecutionFailure { id: String, message: String },
}

impl PipelineError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
        }
    }
}

/// Error categories exposed to boundary layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    ConfigurationError,
    ExecutionFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(PipelineError::invalid_input("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(PipelineError::NotFound("exec-1-0".into()).kind(), ErrorKind::NotFound);
        assert_eq!(PipelineError::config("bad path").kind(), ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_error_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::ConfigurationError).unwrap();
        assert_eq!(json, "\"CONFIGURATION_ERROR\"");
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::ExecutionFailure { id: "exec-0-0".into(), message: "boom".into() };
        assert_eq!(err.to_string(), "Execution 'exec-0-0' failed: boom");
    }
}
