//! The scheduler: ready sets, bounded-parallel dispatch, and state updates.
//!
//! One loop owns all state transitions. Workers run generation and review
//! concurrently and report back; the loop records each outcome through the
//! state store before computing the next ready set.

use crate::dag::builder::TaskGraph;
use crate::dag::executor::{
    EventSink, TaskEvent, WorkerContext, WorkerReport, execute_single_task,
};
use crate::dag::state::{ExecutionTimer, RunSummary, TaskResult};
use crate::errors::{OrchestratorError, StateError};
use crate::generator::GeneratorPort;
use crate::orchestrator::{ProjectState, StateStore};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::review::ReviewPanel;
use crate::task::{FileMap, StatusMap, Task, TaskStatus};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Configuration for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum tasks in flight
    pub max_parallel: usize,
    /// Limit on a single generator call
    pub generation_timeout: Duration,
    /// How long cancelled workers get to wind down before being aborted
    pub cancel_grace: Duration,
    /// Attempts and backoff per task
    pub retry: RetryPolicy,
    /// Project description passed to the generator and reviewers
    pub project_context: String,
    /// Technologies passed to the generator
    pub tech_stack: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            generation_timeout: Duration::from_secs(600),
            cancel_grace: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            project_context: String::new(),
            tech_stack: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Create a config with specific max parallelism.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }

    /// Set the per-call generation timeout.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Set the cancellation grace period.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the project context and tech stack.
    pub fn with_project(mut self, context: &str, tech_stack: Vec<String>) -> Self {
        self.project_context = context.to_string();
        self.tech_stack = tech_stack;
        self
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Continue from recorded state; succeeded tasks are never re-dispatched
    pub resume: bool,
    /// Discard recorded state and start over
    pub force: bool,
    /// Override the configured parallelism
    pub max_parallel: Option<usize>,
    /// Pending tasks to mark skipped at run start
    #[serde(default)]
    pub skip: Vec<String>,
}

impl RunOptions {
    /// Options for a resumed run.
    pub fn resume() -> Self {
        Self {
            resume: true,
            ..Default::default()
        }
    }

    /// Options for a forced fresh run.
    pub fn force() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = Some(max);
        self
    }

    pub fn with_skip(mut self, skip: Vec<String>) -> Self {
        self.skip = skip;
        self
    }
}

/// Everything the scheduler needs, threaded in explicitly.
#[derive(Clone)]
pub struct RunContext {
    pub store: Arc<dyn StateStore>,
    pub generator: Arc<dyn GeneratorPort>,
    pub panel: Arc<ReviewPanel>,
    pub breaker: Arc<CircuitBreaker>,
    pub config: SchedulerConfig,
    pub events: EventSink,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Create a context with an empty review panel and default settings.
    pub fn new(store: Arc<dyn StateStore>, generator: Arc<dyn GeneratorPort>) -> Self {
        Self {
            store,
            generator,
            panel: Arc::new(ReviewPanel::empty()),
            breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            config: SchedulerConfig::default(),
            events: EventSink::none(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_panel(mut self, panel: ReviewPanel) -> Self {
        self.panel = Arc::new(panel);
        self
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<TaskEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Mutable bookkeeping for one run.
struct RunState<'g> {
    project_id: String,
    graph: &'g TaskGraph,
    statuses: StatusMap,
    artifacts: BTreeMap<String, FileMap>,
    results: BTreeMap<String, TaskResult>,
    running: HashSet<String>,
    workers: JoinSet<WorkerReport>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g TaskGraph, state: ProjectState) -> Self {
        Self {
            project_id: state.project_id,
            graph,
            statuses: state.statuses,
            artifacts: state.artifacts,
            results: BTreeMap::new(),
            running: HashSet::new(),
            workers: JoinSet::new(),
        }
    }

    fn status(&self, task_id: &str) -> TaskStatus {
        self.statuses.get(task_id).copied().unwrap_or_default()
    }

    /// Accepted files of a task's direct dependencies.
    fn dependencies_context(&self, task: &Task) -> BTreeMap<String, FileMap> {
        task.dependencies
            .iter()
            .filter_map(|dep| self.artifacts.get(dep).map(|f| (dep.clone(), f.clone())))
            .collect()
    }
}

/// The orchestrator core.
pub struct Scheduler {
    ctx: RunContext,
}

impl Scheduler {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Attempts and backoff for a task. Every task shares the configured policy.
    pub fn retry_policy(&self, _task: &Task) -> &RetryPolicy {
        &self.ctx.config.retry
    }

    /// Run a project's graph until no more tasks can become ready.
    ///
    /// Only an unusable state store aborts the run; task failures are folded
    /// into the summary.
    pub async fn run(
        &self,
        project_id: &str,
        graph: &TaskGraph,
        options: &RunOptions,
    ) -> Result<RunSummary, OrchestratorError> {
        let timer = ExecutionTimer::start();
        let max_parallel = options
            .max_parallel
            .unwrap_or(self.ctx.config.max_parallel)
            .max(1);

        let state = self.prepare_state(project_id, graph, options).await?;
        let resumed: HashSet<String> = graph
            .tasks()
            .iter()
            .filter(|t| state.status(&t.id) == Some(TaskStatus::Succeeded))
            .map(|t| t.id.clone())
            .collect();

        let mut run = RunState::new(graph, state);
        self.apply_skips(&mut run, &options.skip).await?;

        let pending = graph
            .tasks()
            .iter()
            .filter(|t| run.status(&t.id) == TaskStatus::Pending)
            .count();
        tracing::info!(
            project_id,
            total = graph.len(),
            pending,
            resumed = resumed.len(),
            max_parallel,
            "run started"
        );
        self.ctx
            .events
            .emit(TaskEvent::RunStarted {
                project_id: project_id.to_string(),
                total: graph.len(),
                pending,
                resumed: resumed.len(),
            })
            .await;

        let run_cancel = self.ctx.cancel.child_token();

        if let Err(e) = self.drive(&mut run, &run_cancel, max_parallel).await {
            tracing::error!(project_id, error = %e, "state store failed, aborting run");
            run_cancel.cancel();
            run.workers.abort_all();
            while run.workers.join_next().await.is_some() {}
            return Err(e.into());
        }

        let cancelled = run_cancel.is_cancelled();
        if cancelled {
            self.wind_down(&mut run).await;
        }

        let summary = self.summarize(run, &resumed, cancelled, timer.elapsed());
        tracing::info!(
            project_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            blocked = summary.blocked,
            skipped = summary.skipped,
            pending = summary.pending,
            cancelled,
            duration_ms = summary.duration.as_millis() as u64,
            "run completed"
        );
        self.ctx
            .events
            .emit(TaskEvent::RunCompleted {
                summary: Box::new(summary.clone()),
            })
            .await;

        Ok(summary)
    }

    /// Run a state store call on the blocking pool.
    ///
    /// The file store takes an advisory lock and syncs to disk, neither of
    /// which may stall the async workers.
    async fn store_call<T, F>(&self, f: F) -> Result<T, StateError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StateStore) -> Result<T, StateError> + Send + 'static,
    {
        let store = Arc::clone(&self.ctx.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StateError::Interrupted {
                message: e.to_string(),
            })?
    }

    /// Load, resume, or create the project's state.
    async fn prepare_state(
        &self,
        project_id: &str,
        graph: &TaskGraph,
        options: &RunOptions,
    ) -> Result<ProjectState, StateError> {
        let project = project_id.to_string();
        let ids = graph.task_ids();
        let (force, resume) = (options.force, options.resume);

        self.store_call(move |store| {
            if force {
                tracing::info!(project_id = %project, "force: discarding recorded state");
                return store.create(&project, &ids);
            }

            if !store.exists(&project)? {
                return store.create(&project, &ids);
            }

            if !resume {
                return Err(StateError::ProjectExists {
                    project_id: project,
                });
            }

            let before = store.latest_checkpoint(&project)?;
            let reset = before
                .statuses
                .values()
                .filter(|status| status.is_retryable_on_resume())
                .count();
            if reset > 0 {
                tracing::info!(
                    project_id = %project,
                    reset,
                    "unfinished tasks from a previous run return to pending"
                );
            }
            store.resume(&project, &ids)
        })
        .await
    }

    async fn apply_skips(&self, run: &mut RunState<'_>, skip: &[String]) -> Result<(), StateError> {
        for id in skip {
            match run.statuses.get(id).copied() {
                Some(TaskStatus::Pending) if run.graph.contains(id) => {
                    if self
                        .apply(run, id, TaskStatus::Pending, TaskStatus::Skipped, None)
                        .await?
                    {
                        tracing::info!(task_id = %id, "task skipped");
                        run.results
                            .insert(id.clone(), TaskResult::new(id, TaskStatus::Skipped));
                    }
                }
                Some(status) if run.graph.contains(id) => {
                    tracing::warn!(task_id = %id, %status, "cannot skip a task that is not pending");
                }
                _ => tracing::warn!(task_id = %id, "skip list names an unknown task"),
            }
        }
        Ok(())
    }

    /// The dispatch loop. Returns when the graph is terminal, the run is
    /// cancelled, or nothing can make progress.
    async fn drive(
        &self,
        run: &mut RunState<'_>,
        cancel: &CancellationToken,
        max_parallel: usize,
    ) -> Result<(), StateError> {
        let worker_ctx = WorkerContext {
            generator: Arc::clone(&self.ctx.generator),
            panel: Arc::clone(&self.ctx.panel),
            breaker: Arc::clone(&self.ctx.breaker),
            retry: self.ctx.config.retry.clone(),
            generation_timeout: self.ctx.config.generation_timeout,
            project_context: self.ctx.config.project_context.clone(),
            tech_stack: self.ctx.config.tech_stack.clone(),
            events: self.ctx.events.clone(),
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            self.block_unreachable(run).await?;

            if run.graph.is_terminal(&run.statuses) {
                return Ok(());
            }

            let slots = max_parallel.saturating_sub(run.running.len());
            let ready: Vec<Task> = run
                .graph
                .ready_set(&run.statuses)
                .into_iter()
                .take(slots)
                .cloned()
                .collect();

            for task in ready {
                if !self
                    .apply(run, &task.id, TaskStatus::Pending, TaskStatus::Running, None)
                    .await?
                {
                    continue;
                }
                self.spawn_worker(run, task, &worker_ctx, cancel).await;
            }

            if run.running.is_empty() {
                if run.graph.ready_set(&run.statuses).is_empty() {
                    tracing::warn!(
                        project_id = %run.project_id,
                        "no task can make progress; stopping"
                    );
                    return Ok(());
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                joined = run.workers.join_next() => {
                    match joined {
                        Some(Ok(report)) => self.record_report(run, report).await?,
                        Some(Err(e)) => tracing::error!(error = %e, "worker task failed to join"),
                        None => {}
                    }
                }
            }
        }
    }

    async fn spawn_worker(
        &self,
        run: &mut RunState<'_>,
        task: Task,
        worker_ctx: &WorkerContext,
        cancel: &CancellationToken,
    ) {
        let task_id = task.id.clone();
        let deps = run.dependencies_context(&task);
        let mut worker_ctx = worker_ctx.clone();
        worker_ctx.retry = self.retry_policy(&task).clone();
        let worker = execute_single_task(task, deps, worker_ctx, cancel.child_token());
        let panic_id = task_id.clone();

        run.workers.spawn(async move {
            match AssertUnwindSafe(worker).catch_unwind().await {
                Ok(report) => report,
                Err(_) => WorkerReport::Finished(Box::new(
                    TaskResult::new(&panic_id, TaskStatus::Failed).with_error("worker panicked"),
                )),
            }
        });
        run.running.insert(task_id.clone());

        let running = run.running.len();
        tracing::info!(task_id = %task_id, running, "task dispatched");
        self.ctx
            .events
            .emit(TaskEvent::TaskStarted { task_id, running })
            .await;
    }

    /// Record a finished worker's outcome.
    async fn record_report(
        &self,
        run: &mut RunState<'_>,
        report: WorkerReport,
    ) -> Result<(), StateError> {
        let result = match report {
            WorkerReport::Finished(result) => *result,
            WorkerReport::Cancelled { task_id } => {
                // Only reachable if a worker observed cancellation first
                run.running.remove(&task_id);
                self.apply(run, &task_id, TaskStatus::Running, TaskStatus::Pending, None)
                    .await?;
                return Ok(());
            }
        };

        run.running.remove(&result.task_id);
        let status = result.status;
        let artifacts = status.is_success().then(|| result.files.clone());

        if !self
            .apply(run, &result.task_id, TaskStatus::Running, status, artifacts.clone())
            .await?
        {
            tracing::warn!(task_id = %result.task_id, "discarding result after state conflict");
            return Ok(());
        }
        if let Some(files) = artifacts {
            run.artifacts.insert(result.task_id.clone(), files);
        }

        match status {
            TaskStatus::Succeeded => tracing::info!(
                task_id = %result.task_id,
                attempts = result.attempts_made(),
                files = result.files.len(),
                "task succeeded"
            ),
            _ => tracing::warn!(
                task_id = %result.task_id,
                attempts = result.attempts_made(),
                error = result.error.as_deref().unwrap_or("unknown"),
                "task failed"
            ),
        }

        self.ctx
            .events
            .emit(TaskEvent::TaskFinished {
                task_id: result.task_id.clone(),
                status,
                attempts: result.attempts_made(),
                error: result.error.clone(),
            })
            .await;

        run.results.insert(result.task_id.clone(), result);
        Ok(())
    }

    /// Block every pending task that has a failed, blocked, or skipped ancestor.
    async fn block_unreachable(&self, run: &mut RunState<'_>) -> Result<(), StateError> {
        let doomed = run.graph.blockable(&run.statuses);
        if doomed.is_empty() {
            return Ok(());
        }
        let doomed_set: HashSet<&str> = doomed.iter().map(String::as_str).collect();

        for id in &doomed {
            let Some(task) = run.graph.get(id) else {
                continue;
            };
            let blocked_by: Vec<String> = task
                .dependencies
                .iter()
                .filter(|d| run.status(d).blocks_dependents() || doomed_set.contains(d.as_str()))
                .cloned()
                .collect();

            if !self
                .apply(run, id, TaskStatus::Pending, TaskStatus::Blocked, None)
                .await?
            {
                continue;
            }

            let reason = blocked_by
                .iter()
                .map(|d| format!("'{}' {}", d, run.status(d)))
                .collect::<Vec<_>>()
                .join(", ");
            tracing::info!(task_id = %id, blocked_by = %reason, "task blocked");
            run.results.insert(
                id.clone(),
                TaskResult::new(id, TaskStatus::Blocked)
                    .with_error(format!("dependency did not succeed: {}", reason)),
            );
            self.ctx
                .events
                .emit(TaskEvent::TaskBlocked {
                    task_id: id.clone(),
                    blocked_by,
                })
                .await;
        }
        Ok(())
    }

    /// Transition through the store and mirror it locally.
    ///
    /// Returns `Ok(false)` on a precondition conflict, after reloading the
    /// authoritative state.
    async fn apply(
        &self,
        run: &mut RunState<'_>,
        task_id: &str,
        expected: TaskStatus,
        new_status: TaskStatus,
        artifacts: Option<FileMap>,
    ) -> Result<bool, StateError> {
        let project_id = run.project_id.clone();
        let id = task_id.to_string();
        let recorded = self
            .store_call(move |store| {
                store.transition(&project_id, &id, expected, new_status, artifacts)
            })
            .await;

        match recorded {
            Ok(checkpoint) => {
                tracing::debug!(
                    task_id,
                    sequence = checkpoint.sequence,
                    status = %new_status,
                    "checkpoint recorded"
                );
                run.statuses.insert(task_id.to_string(), new_status);
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(task_id, error = %e, "state conflict, reloading");
                let project_id = run.project_id.clone();
                let fresh = self.store_call(move |store| store.load(&project_id)).await?;
                run.statuses = fresh.statuses;
                run.artifacts = fresh.artifacts;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop in-flight workers and return their tasks to pending.
    async fn wind_down(&self, run: &mut RunState<'_>) {
        let grace = self.ctx.config.cancel_grace;
        tracing::warn!(
            project_id = %run.project_id,
            in_flight = run.running.len(),
            grace_ms = grace.as_millis() as u64,
            "run cancelled, waiting for workers"
        );

        let workers = &mut run.workers;
        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("workers did not stop within grace period, aborting");
            run.workers.abort_all();
            while run.workers.join_next().await.is_some() {}
        }

        let in_flight: Vec<String> = run.running.drain().collect();
        for task_id in in_flight {
            if let Err(e) = self
                .apply(run, &task_id, TaskStatus::Running, TaskStatus::Pending, None)
                .await
            {
                tracing::error!(task_id = %task_id, error = %e, "failed to reset cancelled task");
            }
        }
    }

    fn summarize(
        &self,
        mut run: RunState<'_>,
        resumed: &HashSet<String>,
        cancelled: bool,
        duration: Duration,
    ) -> RunSummary {
        let mut summary = RunSummary::new(&run.project_id, run.graph.len());
        summary.cancelled = cancelled;

        for task in run.graph.tasks() {
            let status = run.status(&task.id);
            let mut result = run
                .results
                .remove(&task.id)
                .unwrap_or_else(|| carried_over(&task.id, status, resumed, &run.artifacts));
            result.status = status;
            summary.add_result(result);
        }

        summary.duration = duration;
        summary
    }
}

/// Result for a task the run did not touch.
fn carried_over(
    task_id: &str,
    status: TaskStatus,
    resumed: &HashSet<String>,
    artifacts: &BTreeMap<String, FileMap>,
) -> TaskResult {
    let result = TaskResult::new(task_id, status);
    if status.is_success() && resumed.contains(task_id) {
        let mut result = result.resumed();
        result.files = artifacts.get(task_id).cloned().unwrap_or_default();
        return result;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GenerationRequest, GenerationResult};
    use crate::orchestrator::MemoryStateStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Succeeds unless the task id is listed as failing.
    struct Scripted {
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GeneratorPort for Scripted {
        fn backend_id(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResult> {
            self.calls.lock().unwrap().push(request.task_id.clone());
            if self.failing.contains(&request.task_id) {
                return Ok(GenerationResult::failure(&request.task_id, "scripted failure"));
            }
            let mut files = FileMap::new();
            files.insert(format!("{}.txt", request.task_id), request.task_id.clone());
            Ok(GenerationResult::success(&request.task_id, files))
        }
    }

    fn graph(edges: &[(&str, &[&str])]) -> TaskGraph {
        TaskGraph::build(
            edges
                .iter()
                .map(|(id, deps)| Task::new(id, id, "").with_dependencies(deps.iter().copied()))
                .collect(),
        )
        .unwrap()
    }

    fn scheduler(store: Arc<MemoryStateStore>, generator: Arc<Scripted>) -> Scheduler {
        let config = SchedulerConfig::default().with_retry(RetryPolicy::immediate(2));
        Scheduler::new(RunContext::new(store, generator).with_config(config))
    }

    #[tokio::test]
    async fn test_linear_chain_runs_in_order() {
        let store = Arc::new(MemoryStateStore::new());
        let generator = Scripted::new(&[]);
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

        let summary = scheduler(store.clone(), generator.clone())
            .run("p", &g, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert!(summary.all_success());
        assert_eq!(generator.calls(), vec!["a", "b", "c"]);
        assert_eq!(store.load("p").unwrap().artifacts["c"]["c.txt"], "c");
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_without_attempting_them() {
        let store = Arc::new(MemoryStateStore::new());
        let generator = Scripted::new(&["b"]);
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);

        let summary = scheduler(store, generator.clone())
            .run("p", &g, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.results["b"].attempts_made(), 2);
        assert!(summary.results["d"].error.as_deref().unwrap().contains("'b' failed"));
        assert!(!generator.calls().contains(&"d".to_string()));
    }

    #[tokio::test]
    async fn test_existing_project_requires_resume_or_force() {
        let store = Arc::new(MemoryStateStore::new());
        let g = graph(&[("a", &[])]);
        let sched = scheduler(store, Scripted::new(&[]));

        sched.run("p", &g, &RunOptions::default()).await.unwrap();
        let err = sched.run("p", &g, &RunOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::State(StateError::ProjectExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_resume_skips_succeeded_tasks() {
        let store = Arc::new(MemoryStateStore::new());
        let g = graph(&[("a", &[]), ("b", &["a"])]);

        scheduler(store.clone(), Scripted::new(&[]))
            .run("p", &g, &RunOptions::default())
            .await
            .unwrap();

        let second = Scripted::new(&[]);
        let summary = scheduler(store, second.clone())
            .run("p", &g, &RunOptions::resume())
            .await
            .unwrap();

        assert!(second.calls().is_empty());
        assert_eq!(summary.succeeded, 2);
        assert!(summary.results["a"].resumed);
        assert_eq!(summary.results["a"].files["a.txt"], "a");
    }

    #[tokio::test]
    async fn test_force_resets_everything() {
        let store = Arc::new(MemoryStateStore::new());
        let g = graph(&[("a", &[])]);
        scheduler(store.clone(), Scripted::new(&[]))
            .run("p", &g, &RunOptions::default())
            .await
            .unwrap();

        let again = Scripted::new(&[]);
        scheduler(store, again.clone())
            .run("p", &g, &RunOptions::force())
            .await
            .unwrap();
        assert_eq!(again.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_skip_list_blocks_dependents() {
        let store = Arc::new(MemoryStateStore::new());
        let generator = Scripted::new(&[]);
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &[])]);

        let summary = scheduler(store, generator.clone())
            .run(
                "p",
                &g,
                &RunOptions::default().with_skip(vec!["a".into(), "ghost".into()]),
            )
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(generator.calls(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_priority_orders_dispatch_with_single_slot() {
        let store = Arc::new(MemoryStateStore::new());
        let generator = Scripted::new(&[]);
        let g = TaskGraph::build(vec![
            Task::new("low", "low", ""),
            Task::new("high", "high", "").with_priority(10),
            Task::new("mid", "mid", "").with_priority(5),
        ])
        .unwrap();

        scheduler(store, generator.clone())
            .run("p", &g, &RunOptions::default().with_max_parallel(1))
            .await
            .unwrap();

        assert_eq!(generator.calls(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_empty_graph_completes_immediately() {
        let store = Arc::new(MemoryStateStore::new());
        let summary = scheduler(store, Scripted::new(&[]))
            .run("p", &graph(&[]), &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.total, 0);
        assert!(summary.all_success());
    }
}
