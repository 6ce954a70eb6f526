//! Configuration store for the execution pipeline.
//!
//! The configuration is a tree of named settings addressed by dot-delimited
//! paths (for example `responses.templates`). A single [`ConfigStore`] is
//! shared by every component; changes are visible immediately and persisted
//! only when [`ConfigStore::save_config`] is called.

mod defaults;
mod path;
mod store;
mod validation;

pub use defaults::{default_tree, keys};
pub use store::{ConfigFormat, ConfigStats, ConfigStore};
pub use validation::{FieldType, ResponseRules, ValidationResult, Violation};
