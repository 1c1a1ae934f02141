//! End-to-end scheduler scenarios over in-memory backends.
//!
//! Each scenario wires a scripted generator, optional scripted reviewers,
//! and a state store into a `Scheduler` and checks both the summary and
//! what the store recorded.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use taskforge::dag::{RunContext, RunOptions, Scheduler, SchedulerConfig, TaskEvent, TaskGraph};
use taskforge::generator::{GenerationRequest, GenerationResult, GeneratorPort};
use taskforge::orchestrator::{FileStateStore, MemoryStateStore, StateStore};
use taskforge::resilience::RetryPolicy;
use taskforge::review::{
    FindingSeverity, PanelConfig, ReviewPanel, ReviewRequest, Reviewer, ReviewerVerdict,
};
use taskforge::task::{FileMap, Task, TaskStatus};

// =============================================================================
// Test doubles
// =============================================================================

/// Generator whose per-task behavior is scripted up front.
#[derive(Default)]
struct ScriptedGenerator {
    /// Remaining failures per task before it starts succeeding
    failures: Mutex<HashMap<String, u32>>,
    /// Tasks that never return until cancelled
    hanging: Vec<String>,
    calls: Mutex<Vec<GenerationRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self::default()
    }

    fn failing(self, task_id: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(task_id.to_string(), times);
        self
    }

    fn hanging(mut self, task_id: &str) -> Self {
        self.hanging.push(task_id.to_string());
        self
    }

    fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn call_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.task_id).collect()
    }

    fn calls_for(&self, task_id: &str) -> usize {
        self.calls().iter().filter(|r| r.task_id == task_id).count()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneratorPort for ScriptedGenerator {
    fn backend_id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if self.hanging.contains(&request.task_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&request.task_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Ok(GenerationResult::failure(&request.task_id, "scripted failure"));
        }

        let mut files = FileMap::new();
        files.insert(
            format!("{}.rs", request.task_id),
            format!("// attempt {}", request.attempt),
        );
        Ok(GenerationResult::success(&request.task_id, files))
    }
}

/// Reviewer that rejects the first `rejections` requests, then approves.
struct ScriptedReviewer {
    id: String,
    rejections: AtomicUsize,
}

impl ScriptedReviewer {
    fn new(id: &str, rejections: usize) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            rejections: AtomicUsize::new(rejections),
        })
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assess(&self, _request: &ReviewRequest) -> Result<ReviewerVerdict> {
        let remaining = self.rejections.load(Ordering::SeqCst);
        if remaining > 0 {
            self.rejections.store(remaining - 1, Ordering::SeqCst);
            return Ok(ReviewerVerdict::reject()
                .with_finding(FindingSeverity::Error, "missing error handling"));
        }
        Ok(ReviewerVerdict::approve())
    }
}

/// Reviewer whose vote depends on the attempt under review.
struct AttemptReviewer {
    id: String,
    /// Attempts this reviewer rejects
    rejects: Vec<u32>,
}

impl AttemptReviewer {
    fn new(id: String, rejects: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            id,
            rejects: rejects.to_vec(),
        })
    }
}

#[async_trait]
impl Reviewer for AttemptReviewer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assess(&self, request: &ReviewRequest) -> Result<ReviewerVerdict> {
        if !self.rejects.contains(&request.attempt) {
            return Ok(ReviewerVerdict::approve());
        }
        // Only the first attempt has problems worth blocking on
        let severity = if request.attempt == 1 {
            FindingSeverity::Error
        } else {
            FindingSeverity::Note
        };
        Ok(ReviewerVerdict::reject()
            .with_finding(severity, &format!("{} objects to attempt {}", self.id, request.attempt)))
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

fn config(max_attempts: u32) -> SchedulerConfig {
    SchedulerConfig::default().with_retry(RetryPolicy::immediate(max_attempts))
}

fn scheduler(
    store: Arc<dyn StateStore>,
    generator: Arc<ScriptedGenerator>,
    max_attempts: u32,
) -> Scheduler {
    Scheduler::new(RunContext::new(store, generator).with_config(config(max_attempts)))
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_diamond_runs_dependencies_first_and_passes_context() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);

    let summary = scheduler(store.clone(), generator.clone(), 1)
        .run("diamond", &g, &RunOptions::default())
        .await
        .unwrap();

    assert!(summary.all_success());
    let order = generator.call_ids();
    let pos = |id: &str| order.iter().position(|c| c == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));

    let d_request = generator
        .calls()
        .into_iter()
        .find(|r| r.task_id == "d")
        .unwrap();
    let deps: Vec<&String> = d_request.dependencies_context.keys().collect();
    assert_eq!(deps, vec!["b", "c"]);
    assert_eq!(d_request.dependencies_context["b"]["b.rs"], "// attempt 1");
}

#[tokio::test]
async fn test_checkpoint_log_respects_dependency_order() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);

    scheduler(store.clone(), generator, 1)
        .run("log", &g, &RunOptions::default())
        .await
        .unwrap();

    let state = store.load("log").unwrap();
    let seq_of = |task: &str, stage: &str| {
        state
            .checkpoints
            .iter()
            .find(|c| c.task_id.as_deref() == Some(task) && c.stage == stage)
            .map(|c| c.sequence)
            .unwrap()
    };

    // No task starts running before every dependency has succeeded
    for (task, deps) in [("b", vec!["a"]), ("c", vec!["a"]), ("d", vec!["b", "c"])] {
        for dep in deps {
            assert!(seq_of(dep, "succeeded") < seq_of(task, "running"));
        }
    }

    let sequences: Vec<u64> = state.checkpoints.iter().map(|c| c.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let tasks: Vec<(String, &[&str])> = (0..8).map(|i| (format!("t{}", i), &[][..])).collect();
    let edges: Vec<(&str, &[&str])> = tasks.iter().map(|(id, d)| (id.as_str(), *d)).collect();
    let g = graph(&edges);

    let summary = scheduler(store, generator.clone(), 1)
        .run("wide", &g, &RunOptions::default().with_max_parallel(3))
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 8);
    assert!(generator.peak() <= 3);
    assert!(generator.peak() >= 2);
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new().failing("a", 2));
    let g = graph(&[("a", &[])]);

    let summary = scheduler(store, generator.clone(), 3)
        .run("flaky", &g, &RunOptions::default())
        .await
        .unwrap();

    assert!(summary.all_success());
    assert_eq!(summary.results["a"].attempts_made(), 3);
    let attempts: Vec<u32> = generator.calls().iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_retries_never_exceed_budget() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new().failing("a", 100));
    let g = graph(&[("a", &[]), ("b", &["a"])]);

    let summary = scheduler(store.clone(), generator.clone(), 4)
        .run("bounded", &g, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(generator.calls_for("a"), 4);
    assert_eq!(generator.calls_for("b"), 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.blocked, 1);

    let state = store.load("bounded").unwrap();
    assert_eq!(state.status("a"), Some(TaskStatus::Failed));
    assert_eq!(state.status("b"), Some(TaskStatus::Blocked));
    assert!(!state.artifacts.contains_key("a"));
}

#[tokio::test]
async fn test_review_rejection_then_approval() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let panel = ReviewPanel::new(
        vec![
            ScriptedReviewer::new("security", 1) as Arc<dyn Reviewer>,
            ScriptedReviewer::new("style", 1),
            ScriptedReviewer::new("tests", 0),
        ],
        PanelConfig::default(),
    );
    let g = graph(&[("a", &[])]);

    let summary = Scheduler::new(
        RunContext::new(store, generator.clone())
            .with_panel(panel)
            .with_config(config(3)),
    )
    .run("reviewed", &g, &RunOptions::default())
    .await
    .unwrap();

    // First attempt: 1 of 3 approvals, under the default threshold of 2
    let result = &summary.results["a"];
    assert_eq!(result.status, TaskStatus::Succeeded);
    assert_eq!(result.attempts_made(), 2);
    assert_eq!(generator.calls_for("a"), 2);
    assert_eq!(result.review_history.len(), 1);
    assert_eq!(result.review_history[0].approvals, 1);
    assert_eq!(result.review_history[0].findings.len(), 2);
    assert_eq!(result.files["a.rs"], "// attempt 2");
}

#[tokio::test]
async fn test_persistent_rejection_fails_task() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let panel = ReviewPanel::new(
        vec![ScriptedReviewer::new("strict", usize::MAX) as Arc<dyn Reviewer>],
        PanelConfig::default(),
    );
    let g = graph(&[("a", &[]), ("b", &["a"])]);

    let summary = Scheduler::new(
        RunContext::new(store.clone(), generator.clone())
            .with_panel(panel)
            .with_config(config(2)),
    )
    .run("strict", &g, &RunOptions::default())
    .await
    .unwrap();

    assert_eq!(summary.results["a"].status, TaskStatus::Failed);
    assert_eq!(summary.results["a"].review_history.len(), 2);
    assert_eq!(summary.results["b"].status, TaskStatus::Blocked);
    assert_eq!(generator.calls_for("a"), 2);
}

#[tokio::test]
async fn test_twelve_reviewer_panel_feeds_findings_back() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());

    // Attempt 1: 6 of 12 approve. Attempt 2: 9 of 12 approve.
    let mut reviewers: Vec<Arc<dyn Reviewer>> = Vec::new();
    for i in 0..6 {
        reviewers.push(AttemptReviewer::new(format!("steady-{i}"), &[]));
    }
    for i in 0..3 {
        reviewers.push(AttemptReviewer::new(format!("convinced-{i}"), &[1]));
    }
    for i in 0..3 {
        reviewers.push(AttemptReviewer::new(format!("holdout-{i}"), &[1, 2]));
    }
    let panel = ReviewPanel::new(reviewers, PanelConfig::default());
    assert_eq!(panel.threshold(), 8);
    let g = graph(&[("api", &[])]);

    let summary = Scheduler::new(
        RunContext::new(store.clone(), generator.clone())
            .with_panel(panel)
            .with_config(config(3)),
    )
    .run("panel", &g, &RunOptions::default())
    .await
    .unwrap();

    let result = &summary.results["api"];
    assert_eq!(result.status, TaskStatus::Succeeded);
    assert_eq!(result.attempts_made(), 2);

    assert_eq!(result.review_history.len(), 1);
    let retained = &result.review_history[0];
    assert_eq!(retained.attempt, 1);
    assert_eq!(retained.approvals, 6);
    assert_eq!(retained.total_reviewers, 12);
    assert_eq!(retained.findings.len(), 6);

    let decision = result.review.as_ref().unwrap();
    assert!(decision.approved);
    assert_eq!(decision.approvals, 9);
    assert!(decision.blocking_findings.is_empty());

    let calls = generator.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].review_feedback.is_empty());
    assert_eq!(calls[1].attempt, 2);
    assert_eq!(calls[1].review_feedback, retained.findings);
    assert!(
        calls[1]
            .review_feedback
            .iter()
            .all(|f| f.severity == FindingSeverity::Error && f.message.ends_with("attempt 1"))
    );

    let state = store.load("panel").unwrap();
    assert_eq!(state.artifacts["api"]["api.rs"], "// attempt 2");
}

#[tokio::test]
async fn test_resume_retries_failed_and_blocked_tasks() {
    let store = Arc::new(MemoryStateStore::new());
    let g = graph(&[("a", &[]), ("b", &["a"])]);

    let broken = Arc::new(ScriptedGenerator::new().failing("a", u32::MAX));
    let summary = scheduler(store.clone(), broken, 1)
        .run("retry", &g, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.blocked, 1);

    let fixed = Arc::new(ScriptedGenerator::new());
    let summary = scheduler(store.clone(), fixed.clone(), 1)
        .run("retry", &g, &RunOptions::resume())
        .await
        .unwrap();

    assert_eq!(fixed.call_ids(), vec!["a", "b"]);
    assert!(summary.all_success());
    assert_eq!(summary.succeeded, 2);

    let state = store.load("retry").unwrap();
    let resumed = state
        .checkpoints
        .iter()
        .find(|c| c.stage == "resumed")
        .unwrap();
    assert_eq!(resumed.statuses["a"], TaskStatus::Pending);
    assert_eq!(resumed.statuses["b"], TaskStatus::Pending);
}

#[tokio::test]
async fn test_resume_keeps_skipped_tasks_skipped() {
    let store = Arc::new(MemoryStateStore::new());
    let g = graph(&[("a", &[]), ("b", &[])]);

    scheduler(store.clone(), Arc::new(ScriptedGenerator::new()), 1)
        .run(
            "skipped",
            &g,
            &RunOptions::default().with_skip(vec!["b".to_string()]),
        )
        .await
        .unwrap();

    let again = Arc::new(ScriptedGenerator::new());
    let summary = scheduler(store, again.clone(), 1)
        .run("skipped", &g, &RunOptions::resume())
        .await
        .unwrap();

    assert!(again.calls().is_empty());
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.results["b"].status, TaskStatus::Skipped);
}

#[tokio::test]
async fn test_resume_is_idempotent_across_file_store() {
    let dir = TempDir::new().unwrap();
    let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

    let first = Arc::new(ScriptedGenerator::new().failing("c", 1));
    let summary = scheduler(
        Arc::new(FileStateStore::new(dir.path().join("state"))),
        first.clone(),
        1,
    )
    .run("resumable", &g, &RunOptions::default())
    .await
    .unwrap();
    assert_eq!(summary.failed, 1);

    // A fresh store over the same directory picks up where the first left off
    let store = Arc::new(FileStateStore::new(dir.path().join("state")));
    let second = Arc::new(ScriptedGenerator::new());
    let summary = scheduler(store.clone(), second.clone(), 1)
        .run("resumable", &g, &RunOptions::resume())
        .await
        .unwrap();
    assert!(summary.all_success());
    assert_eq!(second.call_ids(), vec!["c"]);
    assert!(summary.results["a"].resumed);
    assert_eq!(summary.results["b"].files["b.rs"], "// attempt 1");

    // A third run over completed state calls nothing
    let third = Arc::new(ScriptedGenerator::new());
    let summary = scheduler(store.clone(), third.clone(), 1)
        .run("resumable", &g, &RunOptions::resume())
        .await
        .unwrap();
    assert!(summary.all_success());
    assert!(third.calls().is_empty());

    let state = store.load("resumable").unwrap();
    assert_eq!(state.artifacts.len(), 3);
    assert_eq!(state.count(TaskStatus::Succeeded), 3);
}

#[tokio::test]
async fn test_cancellation_returns_in_flight_tasks_to_pending() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new().hanging("slow"));
    let g = graph(&[("fast", &[]), ("slow", &[]), ("after", &["slow"])]);
    let cancel = CancellationToken::new();

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let sched = Scheduler::new(
        RunContext::new(store.clone(), generator)
            .with_config(config(1).with_cancel_grace(Duration::from_millis(200)))
            .with_events(tx)
            .with_cancellation(cancel.clone()),
    );

    let trigger = tokio::spawn(async move {
        let mut finished = Vec::new();
        while let Some(event) = rx.recv().await {
            if let TaskEvent::TaskFinished { task_id, .. } = &event {
                finished.push(task_id.clone());
                if task_id == "fast" {
                    cancel.cancel();
                }
            }
        }
        finished
    });

    let summary = sched.run("cancelled", &g, &RunOptions::default()).await.unwrap();
    drop(sched);
    let finished = trigger.await.unwrap();

    assert!(summary.cancelled);
    assert!(!summary.all_success());
    assert_eq!(finished, vec!["fast"]);

    let state = store.load("cancelled").unwrap();
    assert_eq!(state.status("fast"), Some(TaskStatus::Succeeded));
    assert_eq!(state.status("slow"), Some(TaskStatus::Pending));
    assert_eq!(state.status("after"), Some(TaskStatus::Pending));
    assert_eq!(state.count(TaskStatus::Running), 0);
}

#[tokio::test]
async fn test_events_describe_the_run() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new().failing("a", 1));
    let g = graph(&[("a", &[])]);
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);

    let sched = Scheduler::new(
        RunContext::new(store, generator)
            .with_config(config(2))
            .with_events(tx),
    );
    sched.run("events", &g, &RunOptions::default()).await.unwrap();
    drop(sched);

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        let json = serde_json::to_value(&event).unwrap();
        kinds.push(json["type"].as_str().unwrap().to_string());
    }

    assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
    assert_eq!(kinds.last().map(String::as_str), Some("run_completed"));
    assert_eq!(kinds.iter().filter(|k| *k == "attempt_started").count(), 2);
    assert_eq!(kinds.iter().filter(|k| *k == "attempt_failed").count(), 1);
    assert_eq!(kinds.iter().filter(|k| *k == "task_finished").count(), 1);
}

#[tokio::test]
async fn test_unknown_skip_ids_are_ignored() {
    let store = Arc::new(MemoryStateStore::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let g = graph(&[("a", &[])]);

    let summary = scheduler(store, generator, 1)
        .run(
            "skips",
            &g,
            &RunOptions::default().with_skip(vec!["nope".to_string()]),
        )
        .await
        .unwrap();

    assert!(summary.all_success());
    assert_eq!(summary.skipped, 0);
}
