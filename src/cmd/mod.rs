//! CLI command implementations.
//!
//! | Module    | Commands handled                                 |
//! |-----------|--------------------------------------------------|
//! | `run`     | `Run`, `Validate`                                |
//! | `project` | `Status`, `Checkpoints`, `Restore`, `Runs`       |
//! | `config`  | `Config`                                         |

pub mod config;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use project::{cmd_checkpoints, cmd_restore, cmd_runs, cmd_status};
pub use run::{RunArgs, cmd_run, cmd_validate};
