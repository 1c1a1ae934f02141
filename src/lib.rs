//! Taskforge: dependency-aware parallel task generation.
//!
//! A task graph is validated into a [`dag::TaskGraph`], then driven by the
//! [`dag::Scheduler`] with bounded parallelism. Each task is produced by a
//! [`generator::GeneratorPort`], gated by a [`review::ReviewPanel`], and its
//! progress is recorded in an [`orchestrator::StateStore`] so interrupted
//! runs can resume.

pub mod audit;
pub mod config;
pub mod dag;
pub mod errors;
pub mod generator;
pub mod logging;
pub mod orchestrator;
pub mod resilience;
pub mod review;
pub mod task;
pub mod taskforge_config;
pub mod ui;
pub mod util;
