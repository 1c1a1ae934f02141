//! Task graph scheduling.
//!
//! This module runs a project's tasks as a directed acyclic graph. Tasks
//! become ready once every dependency has succeeded and are dispatched with
//! bounded parallelism; failures block everything downstream.
//!
//! ## Architecture
//!
//! 1. **Builder** - Validates tasks and builds the dependency graph
//! 2. **Executor** - Runs one task: generation, retries, and review
//! 3. **Scheduler** - Owns state transitions and dispatches ready tasks
//! 4. **State** - Per-task results and the run summary
//!
//! ## Example
//!
//! ```
//! use taskforge::dag::TaskGraph;
//! use taskforge::task::Task;
//!
//! let graph = TaskGraph::build(vec![
//!     Task::new("schema", "Database schema", ""),
//!     Task::new("api", "REST API", "").with_dependencies(["schema"]),
//!     Task::new("cli", "CLI client", "").with_dependencies(["schema"]),
//!     Task::new("docs", "Docs", "").with_dependencies(["api", "cli"]),
//! ])
//! .unwrap();
//!
//! let waves = graph.compute_waves();
//! assert_eq!(waves.len(), 3);
//! assert_eq!(waves[1], vec!["api", "cli"]);
//! ```

mod builder;
mod executor;
mod scheduler;
mod state;

pub use builder::{TaskGraph, TaskIndex};
pub use executor::{EventSink, TaskEvent, WorkerContext, WorkerReport, execute_single_task};
pub use scheduler::{RunContext, RunOptions, Scheduler, SchedulerConfig};
pub use state::{
    AttemptOutcome, AttemptRecord, ExecutionTimer, RetainedFindings, RunSummary, TaskResult,
    duration_serde,
};
