use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

use crate::taskforge_config::{CONFIG_DIR, TaskforgeConfig};
use crate::task::TaskGraphFile;

/// Default task graph location inside the config directory.
pub const DEFAULT_GRAPH_FILE: &str = "tasks.json";

/// Runtime configuration for a CLI invocation.
///
/// Bridges the unified [`TaskforgeConfig`] with the paths a run needs: the
/// task graph, the state store, audit records, and logs.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub graph_file: PathBuf,
    pub state_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    settings: TaskforgeConfig,
}

impl Config {
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        max_parallel: Option<usize>,
        graph_file: Option<PathBuf>,
    ) -> Result<Self> {
        let settings = TaskforgeConfig::with_cli_args(project_dir, verbose, max_parallel)?;
        let project_dir = settings.project_dir.clone();

        let graph_file = match graph_file {
            Some(path) => path
                .canonicalize()
                .with_context(|| format!("Failed to resolve task graph path {}", path.display()))?,
            None => Self::find_graph_file(&project_dir)?,
        };

        Ok(Self {
            state_dir: settings.state_dir(),
            audit_dir: settings.audit_dir(),
            log_dir: settings.log_dir(),
            project_dir,
            graph_file,
            verbose,
            settings,
        })
    }

    /// Config for commands that do not need a task graph.
    pub fn without_graph(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let settings = TaskforgeConfig::with_cli_args(project_dir, verbose, None)?;
        Ok(Self {
            state_dir: settings.state_dir(),
            audit_dir: settings.audit_dir(),
            log_dir: settings.log_dir(),
            project_dir: settings.project_dir.clone(),
            graph_file: settings.config_dir.join(DEFAULT_GRAPH_FILE),
            verbose,
            settings,
        })
    }

    pub fn settings(&self) -> &TaskforgeConfig {
        &self.settings
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.audit_dir).context("Failed to create audit directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Project id: CLI flag, then the graph file, then config, then the directory name.
    pub fn project_id(&self, cli: Option<&str>, graph: Option<&TaskGraphFile>) -> String {
        cli.map(str::to_string)
            .or_else(|| graph.and_then(|g| g.project.clone()))
            .or_else(|| self.settings.toml.project.name.clone())
            .or_else(|| {
                self.project_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "default".to_string())
    }

    fn find_graph_file(project_dir: &Path) -> Result<PathBuf> {
        let candidates = [
            project_dir.join(CONFIG_DIR).join(DEFAULT_GRAPH_FILE),
            project_dir.join(DEFAULT_GRAPH_FILE),
        ];
        candidates.into_iter().find(|p| p.exists()).ok_or_else(|| {
            anyhow!(
                "No task graph found. Create {}/{} or pass --graph",
                CONFIG_DIR,
                DEFAULT_GRAPH_FILE
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_graph(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, r#"{"tasks": []}"#).unwrap();
    }

    #[test]
    fn test_config_with_explicit_graph() {
        let dir = tempdir().unwrap();
        let graph = dir.path().join("graph.json");
        write_graph(&graph);

        let config =
            Config::new(dir.path().to_path_buf(), true, Some(3), Some(graph.clone())).unwrap();
        assert!(config.verbose);
        assert_eq!(config.graph_file, graph.canonicalize().unwrap());
        assert_eq!(config.settings().max_parallel(), 3);
        assert_eq!(
            config.state_dir,
            dir.path().canonicalize().unwrap().join(".taskforge/state")
        );
    }

    #[test]
    fn test_graph_discovery_prefers_config_dir() {
        let dir = tempdir().unwrap();
        write_graph(&dir.path().join("tasks.json"));
        write_graph(&dir.path().join(".taskforge/tasks.json"));

        let config = Config::new(dir.path().to_path_buf(), false, None, None).unwrap();
        assert!(config.graph_file.ends_with(".taskforge/tasks.json"));
    }

    #[test]
    fn test_missing_graph_is_an_error() {
        let dir = tempdir().unwrap();
        let err = Config::new(dir.path().to_path_buf(), false, None, None).unwrap_err();
        assert!(err.to_string().contains("No task graph found"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::without_graph(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.state_dir.is_dir());
        assert!(config.audit_dir.is_dir());
        assert!(config.log_dir.is_dir());
    }

    #[test]
    fn test_project_id_precedence() {
        let dir = tempdir().unwrap();
        let config = Config::without_graph(dir.path().to_path_buf(), false).unwrap();
        let graph = TaskGraphFile {
            project: Some("from-graph".into()),
            tasks: vec![],
        };

        assert_eq!(config.project_id(Some("cli"), Some(&graph)), "cli");
        assert_eq!(config.project_id(None, Some(&graph)), "from-graph");
        let fallback = config.project_id(None, None);
        assert_eq!(
            fallback,
            dir.path()
                .canonicalize()
                .unwrap()
                .file_name()
                .unwrap()
                .to_string_lossy()
        );
    }
}
