//! Auto execution of detected projects.
//!
//! The [`AutoExecutor`] owns every [`ExecutionRecord`] it creates. Records are
//! kept in a generation-checked arena behind a single lock; all state
//! transitions go through that lock, so readers never observe a record
//! half-way through a transition.
//!
//! Each execution runs on the Tokio runtime:
//! - a semaphore bounds how many executions are `Running` at once
//! - the backend runs in its own task, so a panic only fails that record
//! - cancellation and the optional timeout abort the backend task

mod arena;
mod backend;
mod record;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

pub use arena::ExecutionId;
pub use backend::{plan_steps, ExecutionBackend, ExecutionStep, LocalBackend, StepContext};
pub use record::{
    ExecutionError, ExecutionErrorKind, ExecutionOptions, ExecutionOutcome, ExecutionRecord,
    ExecutionState, StepOutcome,
};

use arena::ExecutionArena;
use crate::config::{keys, ConfigStore};
use crate::detector::{extract_project_metadata, ProjectMetadata};
use crate::error::{PipelineError, PipelineResult};

/// Default maximum number of concurrently running executions.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Maximum number of `Running` executions
    pub max_concurrent: usize,

    /// Timeout used when neither options nor configuration set one
    pub default_timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self { max_concurrent: DEFAULT_MAX_CONCURRENT, default_timeout: None }
    }
}

impl ExecutorSettings {
    /// Read settings from the `execution` configuration subtree.
    pub fn from_config(config: &ConfigStore) -> Self {
        let max_concurrent = config
            .get(keys::EXECUTION_MAX_CONCURRENT)
            .and_then(|v| v.as_u64())
            .map(|n| n.max(1) as usize)
            .unwrap_or(DEFAULT_MAX_CONCURRENT);
        Self { max_concurrent, default_timeout: configured_timeout(config) }
    }
}

fn configured_timeout(config: &ConfigStore) -> Option<Duration> {
    config
        .get(keys::EXECUTION_TIMEOUT_MS)
        .and_then(|v| v.as_u64())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "state", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The execution was pending or running and is now cancelled
    Cancelled,
    /// The execution had already finished; nothing changed
    AlreadyTerminal(ExecutionState),
}

/// Number of tracked executions per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

struct Inner {
    arena: RwLock<ExecutionArena>,
    backend: Arc<dyn ExecutionBackend>,
    semaphore: Arc<Semaphore>,
    settings: ExecutorSettings,
    config: Option<Arc<ConfigStore>>,
    version: watch::Sender<u64>,
}

impl Inner {
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Apply a transition under the arena lock.
    fn transition(
        &self,
        id: ExecutionId,
        target: ExecutionState,
        apply: impl FnOnce(&mut ExecutionRecord),
    ) -> bool {
        let changed = {
            let mut arena = self.arena.write();
            match arena.get_mut(id) {
                Some(entry) => {
                    if entry.record.transition(target) {
                        apply(&mut entry.record);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    fn timeout_for(&self, options: &ExecutionOptions) -> Option<Duration> {
        options
            .timeout
            .or_else(|| self.config.as_deref().and_then(configured_timeout))
            .or(self.settings.default_timeout)
    }
}

/// Owns the lifecycle of project executions.
#[derive(Clone)]
pub struct AutoExecutor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AutoExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoExecutor")
            .field("backend", &self.inner.backend.name())
            .field("settings", &self.inner.settings)
            .field("executions", &self.inner.arena.read().len())
            .finish()
    }
}

impl AutoExecutor {
    /// Create an executor using the given backend.
    pub fn new(backend: Arc<dyn ExecutionBackend>, settings: ExecutorSettings) -> Self {
        Self::build(backend, settings, None)
    }

    /// Create an executor whose settings and timeout follow the configuration.
    pub fn from_config(backend: Arc<dyn ExecutionBackend>, config: Arc<ConfigStore>) -> Self {
        let settings = ExecutorSettings::from_config(&config);
        Self::build(backend, settings, Some(config))
    }

    fn build(
        backend: Arc<dyn ExecutionBackend>,
        settings: ExecutorSettings,
        config: Option<Arc<ConfigStore>>,
    ) -> Self {
        let (version, _) = watch::channel(0);
        let permits = settings.max_concurrent.max(1);
        Self {
            inner: Arc::new(Inner {
                arena: RwLock::new(ExecutionArena::new()),
                backend,
                semaphore: Arc::new(Semaphore::new(permits)),
                settings,
                config,
                version,
            }),
        }
    }

    /// Name of the backend.
    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Executor settings.
    pub fn settings(&self) -> &ExecutorSettings {
        &self.inner.settings
    }

    /// Start a tracked execution.
    ///
    /// Returns the created record immediately. The record is `Running` if a
    /// concurrency slot was free, `Pending` otherwise. Must be called from
    /// within a Tokio runtime.
    pub fn execute_project(
        &self,
        content: &str,
        metadata: Option<ProjectMetadata>,
        options: Map<String, Value>,
    ) -> PipelineResult<ExecutionRecord> {
        if content.trim().is_empty() {
            return Err(PipelineError::invalid_input("content must not be empty"));
        }
        let parsed = ExecutionOptions::parse(options)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PipelineError::config("execution requires a Tokio runtime"))?;

        let metadata = metadata.unwrap_or_else(|| extract_project_metadata(content));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let id = {
            let mut arena = self.inner.arena.write();
            arena.insert(cancel_tx, |id| {
                ExecutionRecord::new(
                    id,
                    content.to_string(),
                    metadata.clone(),
                    parsed.raw.clone(),
                )
            })
        };
        self.inner.notify();
        tracing::info!(id = %id, project = %metadata.name, "Execution created");

        let permit = Arc::clone(&self.inner.semaphore).try_acquire_owned().ok();
        if permit.is_some() {
            self.start(id);
        } else {
            tracing::debug!(id = %id, "Concurrency limit reached, execution queued");
        }

        let record = self
            .get_execution_status(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;

        let ctx = StepContext {
            execution_id: id,
            content: content.to_string(),
            metadata,
            options: parsed.raw.clone(),
            dry_run: parsed.dry_run,
        };
        let timeout = self.inner.timeout_for(&parsed);
        runtime.spawn(supervise(Arc::clone(&self.inner), id, ctx, permit, cancel_rx, timeout));

        Ok(record)
    }

    fn start(&self, id: ExecutionId) -> bool {
        let started = self.inner.transition(id, ExecutionState::Running, |_| {});
        if started {
            tracing::info!(id = %id, "Execution started");
        }
        started
    }

    /// Look up a record. Unknown ids yield `None`.
    pub fn get_execution_status(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        self.inner.arena.read().get(id).map(|e| e.record.clone())
    }

    /// Look up a record by its string id.
    pub fn find(&self, id: &str) -> Option<ExecutionRecord> {
        id.parse().ok().and_then(|id| self.get_execution_status(id))
    }

    /// Snapshot of every tracked record in creation order.
    pub fn get_all_executions(&self) -> Vec<ExecutionRecord> {
        self.inner.arena.read().entries().into_iter().map(|e| e.record.clone()).collect()
    }

    /// Cancel a pending or running execution.
    ///
    /// Cancelling a finished execution changes nothing and reports its state.
    pub fn cancel(&self, id: ExecutionId) -> PipelineResult<CancelOutcome> {
        let outcome = {
            let mut arena = self.inner.arena.write();
            let entry = arena.get_mut(id).ok_or_else(|| PipelineError::NotFound(id.to_string()))?;
            if entry.record.transition(ExecutionState::Cancelled) {
                entry.cancel.send_replace(true);
                CancelOutcome::Cancelled
            } else {
                CancelOutcome::AlreadyTerminal(entry.record.state)
            }
        };

        match outcome {
            CancelOutcome::Cancelled => {
                self.inner.notify();
                tracing::info!(id = %id, "Execution cancelled");
            }
            CancelOutcome::AlreadyTerminal(state) => {
                tracing::debug!(id = %id, state = %state, "Cancel ignored, execution already finished");
            }
        }
        Ok(outcome)
    }

    /// Wait until the execution reaches a terminal state.
    ///
    /// Returns `None` if the id is unknown.
    pub async fn wait_for(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        let mut changes = self.inner.version.subscribe();
        loop {
            match self.get_execution_status(id) {
                None => return None,
                Some(record) if record.state.is_terminal() => return Some(record),
                Some(_) => {}
            }
            if changes.changed().await.is_err() {
                return self.get_execution_status(id);
            }
        }
    }

    /// Drop finished records, returning how many were removed.
    pub fn purge_finished(&self) -> usize {
        let mut arena = self.inner.arena.write();
        let finished: Vec<ExecutionId> = arena
            .entries()
            .into_iter()
            .filter(|e| e.record.state.is_terminal())
            .map(|e| e.record.id)
            .collect();
        for id in &finished {
            arena.remove(*id);
        }
        finished.len()
    }

    /// Count tracked executions by state.
    pub fn counts(&self) -> ExecutionCounts {
        let arena = self.inner.arena.read();
        let mut counts = ExecutionCounts::default();
        for entry in arena.entries() {
            counts.total += 1;
            match entry.record.state {
                ExecutionState::Pending => counts.pending += 1,
                ExecutionState::Running => counts.running += 1,
                ExecutionState::Completed => counts.completed += 1,
                ExecutionState::Failed => counts.failed += 1,
                ExecutionState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Number of executions currently `Running`.
    pub fn running_count(&self) -> usize {
        self.counts().running
    }
}

/// Resolves once the cancellation flag is raised. Never resolves if the
/// record was purged before being cancelled.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn run_steps(
    backend: Arc<dyn ExecutionBackend>,
    ctx: StepContext,
) -> Result<ExecutionOutcome, ExecutionError> {
    let steps = plan_steps(&ctx.metadata);
    let mut outcomes = Vec::with_capacity(steps.len());

    for step in &steps {
        let started = Instant::now();
        let output = backend
            .run_step(step, &ctx)
            .await
            .map_err(|message| ExecutionError::step_failed(Some(step.name.clone()), message))?;
        outcomes.push(StepOutcome {
            name: step.name.clone(),
            output,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    let summary = match &ctx.metadata.name {
        name if name.is_empty() => format!("completed {} step(s)", outcomes.len()),
        name => format!("completed {} step(s) for '{}'", outcomes.len(), name),
    };
    Ok(ExecutionOutcome { summary, steps: outcomes, dry_run: ctx.dry_run })
}

enum Finish {
    Done(Result<ExecutionOutcome, ExecutionError>),
    Cancelled,
}

/// Drive one execution from queueing to its terminal state.
async fn supervise(
    inner: Arc<Inner>,
    id: ExecutionId,
    ctx: StepContext,
    permit: Option<OwnedSemaphorePermit>,
    cancel_rx: watch::Receiver<bool>,
    timeout: Option<Duration>,
) {
    let _permit = match permit {
        Some(permit) => permit,
        None => {
            let acquire = Arc::clone(&inner.semaphore).acquire_owned();
            tokio::select! {
                permit = acquire => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                () = cancelled(cancel_rx.clone()) => return,
            }
        }
    };

    // Already running when `execute_project` got a permit; gone if cancelled meanwhile.
    let state = inner.arena.read().get(id).map(|e| e.record.state);
    match state {
        Some(ExecutionState::Pending) => {
            if !inner.transition(id, ExecutionState::Running, |_| {}) {
                return;
            }
            tracing::info!(id = %id, "Execution started");
        }
        Some(ExecutionState::Running) => {}
        _ => return,
    }

    let work = tokio::spawn(run_steps(Arc::clone(&inner.backend), ctx));
    let abort = work.abort_handle();

    let joined = async move {
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => joined,
                Err(_) => return Err(ExecutionError::timeout(limit)),
            },
            None => work.await,
        };
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ExecutionError::panicked(panic_message(e))),
            Err(e) => Err(ExecutionError::step_failed(None, e.to_string())),
        }
    };

    let finish = tokio::select! {
        result = joined => Finish::Done(result),
        () = cancelled(cancel_rx) => Finish::Cancelled,
    };
    abort.abort();

    match finish {
        Finish::Done(Ok(outcome)) => {
            let summary = outcome.summary.clone();
            if inner.transition(id, ExecutionState::Completed, |r| r.result = Some(outcome)) {
                tracing::info!(id = %id, summary = %summary, "Execution completed");
            }
        }
        Finish::Done(Err(error)) => {
            if error.is_timeout() {
                tracing::warn!(id = %id, error = %error, "Execution timed out");
            } else {
                tracing::warn!(id = %id, error = %error, "Execution failed");
            }
            inner.transition(id, ExecutionState::Failed, |r| r.error = Some(error));
        }
        Finish::Cancelled => {
            tracing::debug!(id = %id, "Execution task stopped after cancellation");
        }
    }
}

fn panic_message(error: tokio::task::JoinError) -> String {
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backend panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backend panicked: {}", s)
    } else {
        "backend panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    const BMAD: &str = "# Epic: Build X\n## Story: ...\nAgent: dev";

    struct FailingBackend;

    #[async_trait]
    impl ExecutionBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run_step(&self, step: &ExecutionStep, _ctx: &StepContext) -> Result<String, String> {
            if step.index == 1 {
                Err("story blew up".to_string())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl ExecutionBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run_step(&self, _step: &ExecutionStep, _ctx: &StepContext) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".to_string())
        }
    }

    struct PanickingBackend;

    #[async_trait]
    impl ExecutionBackend for PanickingBackend {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn run_step(&self, _step: &ExecutionStep, _ctx: &StepContext) -> Result<String, String> {
            panic!("backend exploded");
        }
    }

    fn executor(backend: impl ExecutionBackend + 'static, max_concurrent: usize) -> AutoExecutor {
        AutoExecutor::new(
            Arc::new(backend),
            ExecutorSettings { max_concurrent, default_timeout: None },
        )
    }

    #[tokio::test]
    async fn test_execution_completes() {
        let executor = executor(LocalBackend::new(), 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        assert_eq!(record.state, ExecutionState::Running);
        assert!(record.started_at.is_some());
        assert_eq!(record.metadata.work_items.len(), 3);

        let done = executor.wait_for(record.id).await.unwrap();
        assert_eq!(done.state, ExecutionState::Completed);
        assert!(done.completed_at.is_some());
        let outcome = done.result.unwrap();
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.steps[0].output, "processed epic 'Build X'");
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn test_transition_applies_only_when_allowed() {
        let executor = executor(SlowBackend, 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        executor.cancel(record.id).unwrap();

        let applied = executor.inner.transition(record.id, ExecutionState::Completed, |r| {
            r.error = Some(ExecutionError::panicked("should not be stored"));
        });
        assert!(!applied);
        let after = executor.get_execution_status(record.id).unwrap();
        assert_eq!(after.state, ExecutionState::Cancelled);
        assert!(after.error.is_none());

        assert!(!executor.inner.transition(ExecutionId::new(42, 0), ExecutionState::Running, |_| {}));
    }

    #[tokio::test]
    async fn test_empty_content_is_invalid_input() {
        let executor = executor(LocalBackend::new(), 4);
        let err = executor.execute_project("  \n", None, Map::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(executor.get_all_executions().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_options_are_invalid_input() {
        let executor = executor(LocalBackend::new(), 4);
        let mut options = Map::new();
        options.insert("timeout_ms".into(), json!(-5));
        let err = executor.execute_project(BMAD, None, options).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_execute_outside_runtime_is_reported() {
        let executor = executor(LocalBackend::new(), 4);
        let err = executor.execute_project(BMAD, None, Map::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_step_failure_is_recorded() {
        let executor = executor(FailingBackend, 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        let done = executor.wait_for(record.id).await.unwrap();

        assert_eq!(done.state, ExecutionState::Failed);
        let error = done.error.unwrap();
        assert_eq!(error.kind, ExecutionErrorKind::StepFailed);
        assert_eq!(error.step.as_deref(), Some("story: ..."));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let executor = executor(PanickingBackend, 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        let done = executor.wait_for(record.id).await.unwrap();
        assert_eq!(done.state, ExecutionState::Failed);
        assert_eq!(done.error.unwrap().kind, ExecutionErrorKind::Panicked);

        // The executor keeps working afterwards.
        let other = executor.execute_project(BMAD, None, Map::new()).unwrap();
        assert_eq!(executor.wait_for(other.id).await.unwrap().state, ExecutionState::Failed);
        assert_eq!(executor.counts().total, 2);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let executor = executor(SlowBackend, 4);
        let mut options = Map::new();
        options.insert("timeout_ms".into(), json!(50));
        let record = executor.execute_project(BMAD, None, options).unwrap();

        let done = executor.wait_for(record.id).await.unwrap();
        assert_eq!(done.state, ExecutionState::Failed);
        assert!(done.error.unwrap().is_timeout());
    }

    #[tokio::test]
    async fn test_timeout_from_config() {
        let config = Arc::new(ConfigStore::in_memory());
        config.set(keys::EXECUTION_TIMEOUT_MS, json!(50)).unwrap();
        let executor = AutoExecutor::from_config(Arc::new(SlowBackend), config);

        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        let done = executor.wait_for(record.id).await.unwrap();
        assert!(done.error.unwrap().is_timeout());
    }

    #[tokio::test]
    async fn test_cancel_running_execution() {
        let executor = executor(SlowBackend, 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();

        assert_eq!(executor.cancel(record.id).unwrap(), CancelOutcome::Cancelled);
        let done = executor.wait_for(record.id).await.unwrap();
        assert_eq!(done.state, ExecutionState::Cancelled);
        assert!(done.completed_at.is_some());

        // Give the supervisor a chance to observe the cancellation.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.get_execution_status(record.id).unwrap().state, ExecutionState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_terminal_is_noop() {
        let executor = executor(LocalBackend::new(), 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        let done = executor.wait_for(record.id).await.unwrap();

        let outcome = executor.cancel(record.id).unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal(ExecutionState::Completed));
        let after = executor.get_execution_status(record.id).unwrap();
        assert_eq!(after.state, ExecutionState::Completed);
        assert_eq!(after.completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_found() {
        let executor = executor(LocalBackend::new(), 4);
        let err = executor.cancel(ExecutionId::new(9, 9)).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(executor.get_execution_status(ExecutionId::new(9, 9)).is_none());
        assert!(executor.find("garbage").is_none());
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_executions() {
        let executor = executor(SlowBackend, 1);
        let first = executor.execute_project(BMAD, None, Map::new()).unwrap();
        let second = executor.execute_project(BMAD, None, Map::new()).unwrap();

        assert_eq!(first.state, ExecutionState::Running);
        assert_eq!(second.state, ExecutionState::Pending);
        assert!(second.started_at.is_none());

        // Cancelling a queued execution never starts it.
        assert_eq!(executor.cancel(second.id).unwrap(), CancelOutcome::Cancelled);
        let cancelled = executor.get_execution_status(second.id).unwrap();
        assert_eq!(cancelled.state, ExecutionState::Cancelled);
        assert!(cancelled.started_at.is_none());

        executor.cancel(first.id).unwrap();
    }

    #[tokio::test]
    async fn test_queued_execution_starts_when_slot_frees() {
        let executor = AutoExecutor::new(
            Arc::new(LocalBackend::with_step_delay(Duration::from_millis(20))),
            ExecutorSettings { max_concurrent: 1, default_timeout: None },
        );
        let first = executor.execute_project(BMAD, None, Map::new()).unwrap();
        let second = executor.execute_project(BMAD, None, Map::new()).unwrap();
        assert_eq!(second.state, ExecutionState::Pending);

        let first_done = executor.wait_for(first.id).await.unwrap();
        let second_done = executor.wait_for(second.id).await.unwrap();
        assert_eq!(first_done.state, ExecutionState::Completed);
        assert_eq!(second_done.state, ExecutionState::Completed);
        assert!(second_done.started_at.unwrap() >= first_done.completed_at.unwrap());
    }

    #[tokio::test]
    async fn test_all_executions_in_creation_order() {
        let executor = executor(LocalBackend::new(), 4);
        let ids: Vec<ExecutionId> = (0..5)
            .map(|i| {
                let content = format!("# Epic: Item {i}\nAgent: dev");
                executor.execute_project(&content, None, Map::new()).unwrap().id
            })
            .collect();

        let all = executor.get_all_executions();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), ids);
    }

    #[tokio::test]
    async fn test_purge_finished_invalidates_ids() {
        let executor = executor(LocalBackend::new(), 4);
        let record = executor.execute_project(BMAD, None, Map::new()).unwrap();
        executor.wait_for(record.id).await.unwrap();

        assert_eq!(executor.purge_finished(), 1);
        assert!(executor.get_execution_status(record.id).is_none());

        let next = executor.execute_project(BMAD, None, Map::new()).unwrap();
        assert_ne!(next.id, record.id);
        assert!(executor.find(&record.id.to_string()).is_none());
    }

    #[tokio::test]
    async fn test_dry_run_option() {
        let executor = executor(LocalBackend::new(), 4);
        let mut options = Map::new();
        options.insert("dry_run".into(), json!(true));
        let record = executor.execute_project(BMAD, None, options).unwrap();
        let done = executor.wait_for(record.id).await.unwrap();
        let outcome = done.result.unwrap();
        assert!(outcome.dry_run);
        assert!(outcome.steps[0].output.starts_with("DRY RUN"));
        assert_eq!(done.options["dry_run"], json!(true));
    }

    #[tokio::test]
    async fn test_supplied_metadata_is_used() {
        let executor = executor(LocalBackend::new(), 4);
        let metadata = ProjectMetadata { name: "Given".into(), ..Default::default() };
        let record = executor.execute_project(BMAD, Some(metadata), Map::new()).unwrap();
        assert_eq!(record.metadata.name, "Given");
        assert!(record.metadata.work_items.is_empty());

        let done = executor.wait_for(record.id).await.unwrap();
        assert_eq!(done.result.unwrap().summary, "completed 1 step(s) for 'Given'");
    }
}
