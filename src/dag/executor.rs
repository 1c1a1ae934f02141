//! Task worker: generation, review, and retry for one task.
//!
//! A worker owns a task from dispatch until it succeeds, exhausts its retry
//! budget, or is cancelled. The task stays `Running` across attempts; the
//! scheduler records the final status.

use crate::dag::state::{
    AttemptOutcome, AttemptRecord, ExecutionTimer, RetainedFindings, RunSummary, TaskResult,
};
use crate::errors::TaskError;
use crate::generator::{GenerationRequest, GeneratorPort};
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::review::{Finding, ReviewPanel, ReviewRequest};
use crate::task::{FileMap, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Floor on circuit-open waits so a worker never spins.
const MIN_CIRCUIT_WAIT: Duration = Duration::from_millis(50);

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The run has loaded its state and is about to dispatch.
    RunStarted {
        project_id: String,
        total: usize,
        pending: usize,
        resumed: usize,
    },
    /// A task was dispatched to a worker.
    TaskStarted { task_id: String, running: usize },
    /// A generator call is starting.
    AttemptStarted {
        task_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    /// An attempt failed (generation, timeout, or review rejection).
    AttemptFailed {
        task_id: String,
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    /// The worker is waiting for the backend's circuit to allow calls.
    CircuitOpen {
        task_id: String,
        backend: String,
        retry_after_ms: u64,
    },
    /// Generated files were sent to the review panel.
    ReviewStarted {
        task_id: String,
        attempt: u32,
        reviewers: usize,
    },
    /// The review panel reached a decision.
    ReviewCompleted {
        task_id: String,
        attempt: u32,
        approvals: usize,
        total: usize,
        threshold: usize,
        approved: bool,
    },
    /// A pending task can never run because a dependency did not succeed.
    TaskBlocked {
        task_id: String,
        blocked_by: Vec<String>,
    },
    /// A task reached a final status for this run.
    TaskFinished {
        task_id: String,
        status: TaskStatus,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The run ended.
    RunCompleted { summary: Box<RunSummary> },
}

impl TaskEvent {
    /// Task the event is about, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::AttemptStarted { task_id, .. }
            | Self::AttemptFailed { task_id, .. }
            | Self::CircuitOpen { task_id, .. }
            | Self::ReviewStarted { task_id, .. }
            | Self::ReviewCompleted { task_id, .. }
            | Self::TaskBlocked { task_id, .. }
            | Self::TaskFinished { task_id, .. } => Some(task_id),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }
}

/// Optional event sink shared by the scheduler and its workers.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TaskEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TaskEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every event.
    pub fn none() -> Self {
        Self { tx: None }
    }

    /// Emit an event; a closed receiver is ignored.
    pub async fn emit(&self, event: TaskEvent) {
        if let Some(ref tx) = self.tx {
            tx.send(event).await.ok();
        }
    }
}

/// Shared collaborators every worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub generator: Arc<dyn GeneratorPort>,
    pub panel: Arc<ReviewPanel>,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
    pub generation_timeout: Duration,
    pub project_context: String,
    pub tech_stack: Vec<String>,
    pub events: EventSink,
}

/// What a worker hands back to the scheduler.
#[derive(Debug, Clone)]
pub enum WorkerReport {
    /// The task reached a final status; `result.status` is Succeeded or Failed.
    Finished(Box<TaskResult>),
    /// The run was cancelled while the task was in flight.
    Cancelled { task_id: String },
}

impl WorkerReport {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Finished(result) => &result.task_id,
            Self::Cancelled { task_id } => task_id,
        }
    }
}

/// Run one task to completion: generate, review, retry.
pub async fn execute_single_task(
    task: Task,
    dependencies_context: BTreeMap<String, FileMap>,
    ctx: WorkerContext,
    cancel: CancellationToken,
) -> WorkerReport {
    let timer = ExecutionTimer::start();
    let backend = ctx.generator.backend_id().to_string();

    let mut result = TaskResult::new(&task.id, TaskStatus::Running);
    let mut feedback: Vec<Finding> = Vec::new();
    let mut attempt: u32 = 1;

    let cancelled = || WorkerReport::Cancelled {
        task_id: task.id.clone(),
    };

    loop {
        let attempt_timer = ExecutionTimer::start();
        let attempted = run_attempt(
            &task,
            &dependencies_context,
            &feedback,
            attempt,
            &ctx,
            &cancel,
            &mut result,
        )
        .await;

        let error = match attempted {
            Ok(files) => {
                result.attempts.push(AttemptRecord {
                    attempt,
                    outcome: AttemptOutcome::Succeeded,
                    duration: attempt_timer.elapsed(),
                });
                result.status = TaskStatus::Succeeded;
                result.files = files;
                result.duration = timer.elapsed();
                return WorkerReport::Finished(Box::new(result));
            }
            Err(error) => error,
        };

        if !error.counts_against_budget() {
            if error == TaskError::Cancelled {
                tracing::info!(task_id = %task.id, attempt, "{}", error);
                return cancelled();
            }
            if !wait_for_circuit(&task.id, &backend, &error, &ctx, &cancel).await {
                return cancelled();
            }
            continue;
        }

        result.attempts.push(AttemptRecord {
            attempt,
            outcome: attempt_outcome(&error),
            duration: attempt_timer.elapsed(),
        });
        if matches!(error, TaskError::ReviewRejected { .. }) {
            feedback = result
                .review
                .as_ref()
                .map(|decision| decision.blocking_findings.clone())
                .unwrap_or_default();
        }

        let will_retry = ctx.retry.should_retry(attempt);
        tracing::warn!(task_id = %task.id, attempt, will_retry, error = %error, "attempt failed");
        ctx.events
            .emit(TaskEvent::AttemptFailed {
                task_id: task.id.clone(),
                attempt,
                error: error.to_string(),
                will_retry,
            })
            .await;

        if !will_retry {
            result.status = TaskStatus::Failed;
            result.error = Some(error.to_string());
            result.duration = timer.elapsed();
            return WorkerReport::Finished(Box::new(result));
        }

        let delay = ctx.retry.backoff(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return cancelled(),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// One generate-and-review pass. Returns the approved files.
///
/// Review outcomes are recorded on `result` whether or not they approve.
async fn run_attempt(
    task: &Task,
    dependencies_context: &BTreeMap<String, FileMap>,
    feedback: &[Finding],
    attempt: u32,
    ctx: &WorkerContext,
    cancel: &CancellationToken,
    result: &mut TaskResult,
) -> Result<FileMap, TaskError> {
    if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let backend = ctx.generator.backend_id();
    if !ctx.breaker.allow(backend) {
        return Err(TaskError::CircuitOpen {
            backend: backend.to_string(),
        });
    }

    tracing::info!(task_id = %task.id, attempt, feedback = feedback.len(), "attempt started");
    ctx.events
        .emit(TaskEvent::AttemptStarted {
            task_id: task.id.clone(),
            attempt,
            max_attempts: ctx.retry.max_attempts,
        })
        .await;

    let specification = task.specification();
    let request = GenerationRequest {
        task_id: task.id.clone(),
        specification: specification.clone(),
        project_context: ctx.project_context.clone(),
        tech_stack: ctx.tech_stack.clone(),
        dependencies_context: dependencies_context.clone(),
        attempt,
        review_feedback: feedback.to_vec(),
    };

    let generated = tokio::select! {
        _ = cancel.cancelled() => return Err(TaskError::Cancelled),
        r = tokio::time::timeout(ctx.generation_timeout, ctx.generator.generate(request)) => r,
    };

    let generated = match generated {
        Err(_) => {
            ctx.breaker.record_failure(backend);
            return Err(TaskError::Timeout {
                attempt,
                after: ctx.generation_timeout,
            });
        }
        Ok(Err(e)) => {
            ctx.breaker.record_failure(backend);
            return Err(TaskError::Generation {
                attempt,
                message: format!("{:#}", e),
            });
        }
        Ok(Ok(generated)) if !generated.success => {
            ctx.breaker.record_failure(backend);
            return Err(TaskError::Generation {
                attempt,
                message: generated
                    .error
                    .unwrap_or_else(|| "generator reported failure".to_string()),
            });
        }
        Ok(Ok(generated)) => generated,
    };
    ctx.breaker.record_success(backend);

    ctx.events
        .emit(TaskEvent::ReviewStarted {
            task_id: task.id.clone(),
            attempt,
            reviewers: ctx.panel.len(),
        })
        .await;

    let review_request = ReviewRequest {
        task_id: task.id.clone(),
        specification,
        files: generated.files,
        context: ctx.project_context.clone(),
        attempt,
    };
    let decision = tokio::select! {
        _ = cancel.cancelled() => return Err(TaskError::Cancelled),
        d = ctx.panel.review(&review_request) => d,
    };

    ctx.events
        .emit(TaskEvent::ReviewCompleted {
            task_id: task.id.clone(),
            attempt,
            approvals: decision.approvals,
            total: decision.total_reviewers,
            threshold: decision.threshold,
            approved: decision.approved,
        })
        .await;

    if !decision.blocking_findings.is_empty() {
        result.review_history.push(RetainedFindings {
            attempt,
            approvals: decision.approvals,
            total_reviewers: decision.total_reviewers,
            findings: decision.blocking_findings.clone(),
        });
    }

    let rejection = (!decision.approved).then(|| TaskError::ReviewRejected {
        attempt,
        approvals: decision.approvals,
        total: decision.total_reviewers,
        threshold: decision.threshold,
    });
    result.review = Some(decision);

    match rejection {
        Some(error) => Err(error),
        None => Ok(review_request.files),
    }
}

/// Hold a worker while its backend's circuit is open.
///
/// Returns false when the run was cancelled during the wait.
async fn wait_for_circuit(
    task_id: &str,
    backend: &str,
    reason: &TaskError,
    ctx: &WorkerContext,
    cancel: &CancellationToken,
) -> bool {
    let wait = ctx.breaker.retry_after(backend).max(MIN_CIRCUIT_WAIT);
    tracing::info!(
        task_id,
        wait_ms = wait.as_millis() as u64,
        "{}, waiting",
        reason
    );
    ctx.events
        .emit(TaskEvent::CircuitOpen {
            task_id: task_id.to_string(),
            backend: backend.to_string(),
            retry_after_ms: wait.as_millis() as u64,
        })
        .await;

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}

fn attempt_outcome(error: &TaskError) -> AttemptOutcome {
    match error {
        TaskError::Timeout { .. } => AttemptOutcome::TimedOut,
        TaskError::ReviewRejected {
            approvals, total, ..
        } => AttemptOutcome::ReviewRejected {
            approvals: *approvals,
            total: *total,
        },
        TaskError::Generation { message, .. } => AttemptOutcome::GenerationFailed {
            reason: message.clone(),
        },
        other => AttemptOutcome::GenerationFailed {
            reason: other.to_string(),
        },
    }
}
