use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "taskforge")]
#[command(
    version,
    about = "Dependency-aware parallel task generation with review consensus"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a task graph: generate, review, and record every task
    Run {
        /// Task graph JSON (defaults to .taskforge/tasks.json)
        #[arg(short, long)]
        graph: Option<PathBuf>,

        /// Project id (defaults to the graph's project, then config, then directory name)
        #[arg(long)]
        project: Option<String>,

        /// Continue from recorded state
        #[arg(long)]
        resume: bool,

        /// Discard recorded state and start over
        #[arg(long, conflicts_with = "resume")]
        force: bool,

        /// Maximum tasks in flight
        #[arg(long, env = "TASKFORGE_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Pending tasks to skip (comma-separated)
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Validate a task graph and print its execution waves
    Validate {
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },
    /// Show the status map of a project
    Status {
        #[arg(long)]
        project: Option<String>,
    },
    /// List a project's checkpoint log
    Checkpoints {
        #[arg(long)]
        project: Option<String>,
    },
    /// Restore a project to a prior checkpoint
    Restore {
        /// Checkpoint sequence number
        sequence: u64,

        #[arg(long)]
        project: Option<String>,
    },
    /// List recorded runs, most recent first
    Runs,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default taskforge.toml file
    Init,
}

fn init_logging(cli: &Cli, project_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use taskforge::logging::{self, LogOptions};
    use taskforge::taskforge_config::TaskforgeConfig;

    let settings = TaskforgeConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose, None).ok();
    let mut options = LogOptions::default();
    if let Some(ref settings) = settings {
        options.level = settings.log_level().to_string();
        options.json = settings.toml.logging.json;
        if settings.toml.logging.file && matches!(cli.command, Commands::Run { .. }) {
            options.file_dir = Some(settings.log_dir());
        }
    }
    if cli.verbose {
        options = options.verbose();
    }

    match logging::init(&options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: logging disabled: {:#}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let _log_guard = init_logging(&cli, &project_dir);

    match &cli.command {
        Commands::Run {
            graph,
            project,
            resume,
            force,
            max_parallel,
            skip,
            ui,
        } => {
            let args = cmd::RunArgs {
                graph: graph.clone(),
                project: project.clone(),
                resume: *resume,
                force: *force,
                max_parallel: *max_parallel,
                skip: skip.clone(),
                ui: ui.clone(),
            };
            return cmd::cmd_run(&cli, project_dir, args).await;
        }
        Commands::Validate { graph } => cmd::cmd_validate(&project_dir, graph.clone())?,
        Commands::Status { project } => cmd::cmd_status(&project_dir, project.as_deref())?,
        Commands::Checkpoints { project } => {
            cmd::cmd_checkpoints(&project_dir, project.as_deref())?
        }
        Commands::Restore { sequence, project } => {
            cmd::cmd_restore(&project_dir, *sequence, project.as_deref())?
        }
        Commands::Runs => cmd::cmd_runs(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(ExitCode::SUCCESS)
}
