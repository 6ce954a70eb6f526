//! Pipeline Integration Tests
//!
//! Exercises the assembled pipeline through the public API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bmad_pipeline::executor::{ExecutionErrorKind, ExecutionStep, StepContext};
use bmad_pipeline::{
    BmadSystem, CancelOutcome, ConfigStore, Detector, ExecutionBackend, ExecutionState,
    InterceptDecision, PassReason, PipelineError,
};
use serde_json::{json, Map};
use tempfile::TempDir;

const SCENARIO: &str = "# Epic: Build X\n## Story: ...\nAgent: dev";

fn in_memory() -> BmadSystem {
    BmadSystem::new(Arc::new(ConfigStore::in_memory()))
}

/// Backend that fails any step whose work item title contains "boom".
struct FlakyBackend;

#[async_trait]
impl ExecutionBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn run_step(&self, step: &ExecutionStep, _ctx: &StepContext) -> Result<String, String> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if step.name.contains("boom") {
            Err(format!("step '{}' exploded", step.name))
        } else {
            Ok(format!("ran {}", step.name))
        }
    }
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_plain_text_is_not_bmad() {
    let detector = Detector::new();
    for content in ["", "hello world", "fn main() {}", "# Shopping list\n- eggs\n- milk"] {
        let result = detector.detect_bmad(content);
        assert!(!result.is_bmad, "{content:?}");
        assert_eq!(result.confidence, 0.0, "{content:?}");
        assert!(result.matched_markers.is_empty());
    }
}

#[test]
fn test_metadata_extraction_never_fails() {
    let detector = Detector::new();
    for content in ["", "---\nname: [unterminated\n", "\u{0}\u{1}", "# \n## \nAgent:"] {
        let metadata = detector.extract_project_metadata(content);
        assert!(metadata.format == "bmad" || metadata.format == "unknown", "{content:?}");
    }
    assert!(detector.extract_project_metadata("").is_empty());
}

#[test]
fn test_detection_result_wire_names() {
    let result = Detector::new().detect_bmad(SCENARIO);
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["isBMAD"], json!(true));
    assert!(value["matchedMarkers"].is_array());
    assert_eq!(value["metadata"]["name"], json!("Build X"));
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_scenario_runs_to_completion() {
    let system = in_memory();
    system.config().set_execution_mode(true);

    let response = system.execute(SCENARIO, Map::new()).unwrap();
    assert!(response.detection.is_bmad);

    let record = response.execution.expect("execution started");
    assert!(matches!(record.state, ExecutionState::Pending | ExecutionState::Running));

    let done = system.wait(&record.id.to_string()).await.unwrap();
    assert_eq!(done.state, ExecutionState::Completed);
    assert!(done.started_at.unwrap() <= done.completed_at.unwrap());
    assert_eq!(done.result.unwrap().steps.len(), 3);
}

#[tokio::test]
async fn test_executions_listed_in_creation_order() {
    let system = in_memory();
    system.config().set_execution_mode(true);

    let mut ids = Vec::new();
    for i in 0..8 {
        let content = format!("# Epic: Project {i}\n## Story: part {i}\nAgent: dev");
        let response = system.execute(&content, Map::new()).unwrap();
        ids.push(response.execution.unwrap().id);
    }

    let listed: Vec<_> = system.executions().into_iter().map(|r| r.id).collect();
    assert_eq!(listed, ids);

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8);
}

#[tokio::test]
async fn test_concurrent_executions_are_independent() {
    let config = Arc::new(ConfigStore::in_memory());
    config.set_execution_mode(true);
    let system = BmadSystem::with_backend(config, Arc::new(FlakyBackend));

    let ok = system
        .execute("# Epic: Fine\n## Story: calm\nAgent: dev", Map::new())
        .unwrap()
        .execution
        .unwrap();
    let bad = system
        .execute("# Epic: Risky\n## Story: boom\nAgent: dev", Map::new())
        .unwrap()
        .execution
        .unwrap();
    assert_ne!(ok.id, bad.id);

    let (ok_id, bad_id) = (ok.id.to_string(), bad.id.to_string());
    let (ok_done, bad_done) = futures::join!(system.wait(&ok_id), system.wait(&bad_id));
    let (ok_done, bad_done) = (ok_done.unwrap(), bad_done.unwrap());

    assert_eq!(ok_done.state, ExecutionState::Completed);
    assert_eq!(bad_done.state, ExecutionState::Failed);
    let error = bad_done.error.as_ref().unwrap();
    assert_eq!(error.kind, ExecutionErrorKind::StepFailed);
    assert!(matches!(bad_done.failure(), Some(PipelineError::ExecutionFailure { .. })));

    let stats = system.stats();
    assert_eq!(stats.executions.completed, 1);
    assert_eq!(stats.executions.failed, 1);
}

#[tokio::test]
async fn test_many_concurrent_submissions() {
    let system = in_memory();
    system.config().set_execution_mode(true);

    let ids: Vec<String> = (0..20)
        .map(|i| {
            let content = format!("# Epic: Batch {i}\nAgent: dev");
            system.execute(&content, Map::new()).unwrap().execution.unwrap().id.to_string()
        })
        .collect();

    let finished = futures::future::join_all(ids.iter().map(|id| system.wait(id))).await;
    assert!(finished.iter().all(|r| r.as_ref().unwrap().state == ExecutionState::Completed));
    assert_eq!(system.stats().executions.total, 20);
}

#[tokio::test]
async fn test_cancel_finished_execution_is_noop() {
    let system = in_memory();
    system.config().set_execution_mode(true);

    let record = system.execute(SCENARIO, Map::new()).unwrap().execution.unwrap();
    let id = record.id.to_string();
    let done = system.wait(&id).await.unwrap();

    let outcome = system.cancel(&id).unwrap();
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal(ExecutionState::Completed));
    assert_eq!(system.execution(&id).unwrap().completed_at, done.completed_at);
}

#[tokio::test]
async fn test_configured_timeout_fails_execution() {
    let config = Arc::new(ConfigStore::in_memory());
    config.set_execution_mode(true);
    config.set("execution.step_delay_ms", json!(200)).unwrap();
    config.set("execution.timeout_ms", json!(20)).unwrap();
    let system = BmadSystem::new(config);

    let record = system.execute(SCENARIO, Map::new()).unwrap().execution.unwrap();
    let done = system.wait(&record.id.to_string()).await.unwrap();
    assert_eq!(done.state, ExecutionState::Failed);
    assert_eq!(done.error.unwrap().kind, ExecutionErrorKind::Timeout);
}

#[test]
fn test_non_bmad_content_passes_through() {
    let system = in_memory();
    system.config().set_execution_mode(true);

    let response = system.execute("just a note", Map::new()).unwrap();
    assert_eq!(response.decision, InterceptDecision::PassThrough(PassReason::NotBmad));
    assert_eq!(response.content, "just a note");
    assert!(!response.modified);
    assert!(response.execution.is_none());
}

#[test]
fn test_execute_outside_runtime_reports_configuration_error() {
    let system = in_memory();
    system.config().set_execution_mode(true);
    let err = system.execute(SCENARIO, Map::new()).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
}

#[test]
fn test_blocking_caller_can_drive_execution() {
    let system = in_memory();
    system.config().set_execution_mode(true);

    let state = tokio_test::block_on(async {
        let record = system.execute(SCENARIO, Map::new()).unwrap().execution.unwrap();
        system.wait(&record.id.to_string()).await.unwrap().state
    });
    assert!(state.is_terminal());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_execution_mode_visible_before_save() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path().join("config.json")).unwrap();

    store.set_execution_mode(true);
    assert_eq!(store.get("execution.enabled"), Some(json!(true)));
    assert!(!dir.path().join("config.json").exists());
}

#[test]
fn test_toggle_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bmad.toml");
    let system = BmadSystem::new(Arc::new(ConfigStore::open(&path).unwrap()));

    assert!(system.toggle_execution_mode().unwrap());

    let reopened = ConfigStore::open(&path).unwrap();
    assert!(reopened.execution_mode());
}

#[test]
fn test_set_get_round_trip() {
    let store = ConfigStore::in_memory();
    let values = [
        ("a", json!(1)),
        ("b.c", json!("text")),
        ("deep.nested.path.here", json!({ "x": [1, 2, { "y": null }] })),
        ("responses.templates.epilogue", json!("Bye")),
        ("flags.on", json!(true)),
    ];
    for (path, value) in values {
        store.set(path, value.clone()).unwrap();
        assert_eq!(store.get(path), Some(value), "{path}");
    }
    assert_eq!(store.get("never.set"), None);
}

#[test]
fn test_validate_empty_response() {
    let store = ConfigStore::in_memory();
    store.set("responses.validation", json!({ "required_fields": ["summary"] })).unwrap();

    let result = store.validate_execution_response(&json!({}));
    assert!(!result.valid);
    assert_eq!(result.missing_fields(), vec!["summary"]);

    let result = store.validate_execution_response(&json!("not an object"));
    assert!(!result.valid);
}
