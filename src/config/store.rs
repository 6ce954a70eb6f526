//! Process-wide configuration store.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::defaults::{default_tree, keys};
use super::path;
use super::validation::{ResponseRules, ValidationResult, Violation};
use crate::error::{PipelineError, PipelineResult};

/// On-disk format of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension. Anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }

    fn serialize(self, tree: &Value) -> PipelineResult<String> {
        match self {
            Self::Json => serde_json::to_string_pretty(tree)
                .map_err(|e| PipelineError::config(format!("failed to serialize config: {}", e))),
            // TOML has no null; unset keys are simply absent.
            Self::Toml => toml::to_string_pretty(&path::without_nulls(tree))
                .map_err(|e| PipelineError::config(format!("failed to serialize config: {}", e))),
        }
    }

    fn parse(self, content: &str) -> PipelineResult<Value> {
        match self {
            Self::Json => serde_json::from_str(content)
                .map_err(|e| PipelineError::config(format!("failed to parse config: {}", e))),
            Self::Toml => toml::from_str(content)
                .map_err(|e| PipelineError::config(format!("failed to parse config: {}", e))),
        }
    }
}

/// Counter view of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStats {
    /// Numeric counters under `stats`
    pub counters: BTreeMap<String, u64>,

    /// Last time pipeline activity was recorded (RFC 3339)
    pub last_updated: Option<String>,

    /// Current execution-mode flag
    pub execution_enabled: bool,
}

/// Hierarchical key-value configuration with dotted-path access.
///
/// Mutations and saves are serialized: a save always captures a complete
/// snapshot of the tree, never a partially applied `set`.
#[derive(Debug)]
pub struct ConfigStore {
    tree: RwLock<Value>,
    path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl ConfigStore {
    /// Create a store holding defaults, with no backing file.
    pub fn in_memory() -> Self {
        Self { tree: RwLock::new(default_tree()), path: None, save_lock: Mutex::new(()) }
    }

    /// Open a store backed by `path`.
    ///
    /// A missing file yields defaults; an existing file is merged over them.
    pub fn open(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let path = path.into();
        let tree = load_tree(&path)?;
        tracing::debug!(path = ?path, "Loaded configuration");
        Ok(Self { tree: RwLock::new(tree), path: Some(path), save_lock: Mutex::new(()) })
    }

    /// Open the store at the default location.
    pub fn open_default() -> PipelineResult<Self> {
        let path = Self::default_path()
            .ok_or_else(|| PipelineError::config("could not determine config directory"))?;
        Self::open(path)
    }

    /// Default config file location (`<config_dir>/bmad/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bmad").join("config.json"))
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the value at a dotted path. Unset or invalid paths are absent.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = path::parse(path).ok()?;
        let tree = self.tree.read();
        path::lookup(&tree, &segments).cloned()
    }

    /// Get a value and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get(path).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Set the value at a dotted path, creating missing intermediate objects.
    pub fn set(&self, path: &str, value: Value) -> PipelineResult<()> {
        let segments = path::parse(path)?;
        let mut tree = self.tree.write();
        path::assign(&mut tree, &segments, value)?;
        tracing::debug!(path, "Configuration updated");
        Ok(())
    }

    /// Remove the value at a dotted path.
    pub fn remove(&self, path: &str) -> PipelineResult<Option<Value>> {
        let segments = path::parse(path)?;
        let mut tree = self.tree.write();
        Ok(path::remove(&mut tree, &segments))
    }

    /// Snapshot of the whole tree.
    pub fn get_all(&self) -> Value {
        self.tree.read().clone()
    }

    /// Persist the current tree to the backing file.
    pub fn save_config(&self) -> PipelineResult<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| PipelineError::config("configuration has no backing file"))?;

        let _guard = self.save_lock.lock();
        let content = {
            let tree = self.tree.read();
            ConfigFormat::from_path(path).serialize(&tree)?
        };

        write_atomic(path, content.as_bytes())?;
        tracing::info!(path = ?path, "Configuration saved");
        Ok(())
    }

    /// Replace the in-memory tree with the contents of the backing file.
    pub fn reload(&self) -> PipelineResult<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| PipelineError::config("configuration has no backing file"))?;
        let tree = load_tree(path)?;
        *self.tree.write() = tree;
        Ok(())
    }

    /// Set the execution-mode flag. Does not persist.
    pub fn set_execution_mode(&self, enabled: bool) {
        let mut tree = self.tree.write();
        // The path is a constant and the defaults keep `execution` an object.
        if let Err(e) = path::assign(&mut tree, &["execution", "enabled"], Value::Bool(enabled)) {
            tracing::warn!(error = %e, "Resetting malformed execution section");
            tree["execution"] = serde_json::json!({ "enabled": enabled });
        }
        tracing::info!(enabled, "Execution mode changed");
    }

    /// Flip the execution-mode flag, returning the new value. Does not persist.
    pub fn toggle_execution_mode(&self) -> bool {
        let mut tree = self.tree.write();
        let enabled = !tree
            .get("execution")
            .and_then(|e| e.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let Err(e) = path::assign(&mut tree, &["execution", "enabled"], Value::Bool(enabled)) {
            tracing::warn!(error = %e, "Resetting malformed execution section");
            tree["execution"] = serde_json::json!({ "enabled": enabled });
        }
        tracing::info!(enabled, "Execution mode changed");
        enabled
    }

    /// Current execution-mode flag.
    pub fn execution_mode(&self) -> bool {
        self.get(keys::EXECUTION_ENABLED).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Check a response object against the configured rules.
    pub fn validate_execution_response(&self, response: &Value) -> ValidationResult {
        let rules = self.get(keys::RESPONSE_VALIDATION).unwrap_or(Value::Null);
        match ResponseRules::from_value(&rules) {
            Ok(rules) => rules.validate(response),
            Err(message) => {
                let mut result = ValidationResult::ok();
                result.add(Violation::InvalidRules { message });
                result
            }
        }
    }

    /// Configured response templates.
    pub fn templates(&self) -> Value {
        self.get(keys::RESPONSE_TEMPLATES).unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Increment a counter under `stats`, returning the new value.
    pub fn increment_counter(&self, name: &str) -> u64 {
        let mut tree = self.tree.write();
        let current = tree.get(keys::STATS).and_then(|s| s.get(name)).and_then(Value::as_u64);
        let next = current.unwrap_or(0) + 1;
        if path::assign(&mut tree, &[keys::STATS, name], Value::from(next)).is_err() {
            tree[keys::STATS] = serde_json::json!({ name: next });
        }
        next
    }

    /// Record pipeline activity by stamping `stats.last_updated`.
    pub fn touch(&self) {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tree = self.tree.write();
        if path::assign(&mut tree, &[keys::STATS, "last_updated"], Value::String(now.clone()))
            .is_err()
        {
            tree[keys::STATS] = serde_json::json!({ "last_updated": now });
        }
    }

    /// Recompute the counter view.
    pub fn get_stats(&self) -> ConfigStats {
        let tree = self.tree.read();
        let counters = tree
            .get(keys::STATS)
            .and_then(Value::as_object)
            .map(|stats| {
                stats
                    .iter()
                    .filter_map(|(name, value)| value.as_u64().map(|n| (name.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();

        let last_updated = tree
            .get(keys::STATS)
            .and_then(|s| s.get("last_updated"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let execution_enabled = tree
            .get("execution")
            .and_then(|e| e.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        ConfigStats { counters, last_updated, execution_enabled }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn load_tree(path: &Path) -> PipelineResult<Value> {
    let mut tree = default_tree();
    if !path.exists() {
        return Ok(tree);
    }

    let content = fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("failed to read '{}': {}", path.display(), e))
    })?;
    let stored = ConfigFormat::from_path(path).parse(&content)?;
    if !stored.is_object() {
        return Err(PipelineError::config(format!(
            "'{}' does not contain a configuration object",
            path.display()
        )));
    }

    path::merge(&mut tree, stored);
    Ok(tree)
}

/// Write to a sibling temp file, sync, then rename over the target.
fn write_atomic(path: &Path, content: &[u8]) -> PipelineResult<()> {
    let io_err = |action: &str, e: std::io::Error| {
        PipelineError::config(format!("failed to {} '{}': {}", action, path.display(), e))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| PipelineError::config(format!("'{}' is not a file", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut file = File::create(&temp_path).map_err(|e| io_err("write", e))?;
    file.write_all(content).map_err(|e| io_err("write", e))?;
    file.sync_all().map_err(|e| io_err("sync", e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        io_err("replace", e)
    })
}
