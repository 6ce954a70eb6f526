//! # BMAD Pipeline
//!
//! Detects BMAD-formatted project content and, when execution mode is on,
//! augments it with guardrails and tracks its automatic execution.
//!
//! ## Components
//!
//! - **Config Store**: dotted-path configuration with atomic persistence and
//!   response validation
//! - **Detector**: weighted marker rules and metadata extraction
//! - **Interceptor**: routes content to execution or pass-through
//! - **Prompt Modifier**: template-driven guardrails with a re-application guard
//! - **Auto Executor**: concurrent execution lifecycle with cancellation and timeouts
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bmad_pipeline::{BmadSystem, ConfigStore};
//!
//! # async fn run() -> bmad_pipeline::PipelineResult<()> {
//! let system = BmadSystem::new(Arc::new(ConfigStore::open_default()?));
//! system.config().set_execution_mode(true);
//!
//! let response = system.execute("# Epic: Build X\n## Story: ...\nAgent: dev", Default::default())?;
//! if let Some(record) = response.execution {
//!     let done = system.wait(&record.id.to_string()).await?;
//!     println!("{}", done.state);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::redundant_clone)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::format_push_string)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)]

pub mod config;
pub mod detector;
pub mod error;
pub mod executor;
pub mod interceptor;
pub mod modifier;
pub mod system;

// Re-export commonly used types
pub use config::{ConfigStats, ConfigStore, ValidationResult, Violation};
pub use detector::{DetectionResult, Detector, ProjectMetadata, WorkItem, WorkItemKind};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use executor::{
    AutoExecutor, CancelOutcome, ExecutionBackend, ExecutionCounts, ExecutionId, ExecutionRecord,
    ExecutionState, LocalBackend,
};
pub use interceptor::{InterceptDecision, Interceptor, PassReason};
pub use modifier::{ModifiedPrompt, PromptModifier, ResponseTemplates};
pub use system::{BmadSystem, ExecuteResponse, Statistics, SystemStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "bmad";
