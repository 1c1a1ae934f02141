//! State store implementations.
//!
//! `StateStore` is the only way the scheduler mutates project state. Every
//! operation is an atomic read-modify-write on one project record:
//! - `FileStateStore` keeps one directory per project on disk
//! - `MemoryStateStore` keeps records in process, for tests and embedding
//!
//! Both are synchronous; async callers run them on the blocking pool.

use crate::errors::StateError;
use crate::orchestrator::state::{Checkpoint, ProjectState};
use crate::task::{FileMap, StatusMap, TaskStatus};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Durable, resumable record of project progress.
pub trait StateStore: Send + Sync {
    /// Load a project's state, or `NotFound`.
    fn load(&self, project_id: &str) -> Result<ProjectState, StateError>;

    /// Check whether a project has recorded state.
    fn exists(&self, project_id: &str) -> Result<bool, StateError>;

    /// Create (or overwrite) a project with every task pending.
    fn create(&self, project_id: &str, task_ids: &[String]) -> Result<ProjectState, StateError>;

    /// Reconcile an existing project with the current graph and record a
    /// checkpoint. Running, failed, and blocked tasks return to pending.
    fn resume(&self, project_id: &str, task_ids: &[String]) -> Result<ProjectState, StateError>;

    /// Atomically move a task from `expected` to `new_status`.
    fn transition(
        &self,
        project_id: &str,
        task_id: &str,
        expected: TaskStatus,
        new_status: TaskStatus,
        artifacts: Option<FileMap>,
    ) -> Result<Checkpoint, StateError>;

    /// Most recent checkpoint of a project.
    fn latest_checkpoint(&self, project_id: &str) -> Result<Checkpoint, StateError> {
        let state = self.load(project_id)?;
        state
            .latest_checkpoint()
            .cloned()
            .ok_or_else(|| StateError::CheckpointNotFound {
                project_id: project_id.to_string(),
                sequence: 0,
            })
    }

    /// Operator restore to a prior checkpoint.
    fn restore(&self, project_id: &str, sequence: u64) -> Result<ProjectState, StateError>;

    /// Ids of every project with recorded state, sorted.
    fn list_projects(&self) -> Result<Vec<String>, StateError>;
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    projects: Mutex<HashMap<String, ProjectState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<T>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut ProjectState) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let mut projects = lock_recover(&self.projects);
        let state = projects
            .get_mut(project_id)
            .ok_or_else(|| StateError::NotFound {
                project_id: project_id.to_string(),
            })?;

        // Apply to a copy so a failed mutation leaves the record untouched
        let mut next = state.clone();
        let out = f(&mut next)?;
        *state = next;
        Ok(out)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, project_id: &str) -> Result<ProjectState, StateError> {
        lock_recover(&self.projects)
            .get(project_id)
            .cloned()
            .ok_or_else(|| StateError::NotFound {
                project_id: project_id.to_string(),
            })
    }

    fn exists(&self, project_id: &str) -> Result<bool, StateError> {
        Ok(lock_recover(&self.projects).contains_key(project_id))
    }

    fn create(&self, project_id: &str, task_ids: &[String]) -> Result<ProjectState, StateError> {
        let state = ProjectState::new(project_id, task_ids.iter().cloned());
        lock_recover(&self.projects).insert(project_id.to_string(), state.clone());
        Ok(state)
    }

    fn resume(&self, project_id: &str, task_ids: &[String]) -> Result<ProjectState, StateError> {
        self.mutate(project_id, |state| {
            state.reconcile(task_ids);
            Ok(state.clone())
        })
    }

    fn transition(
        &self,
        project_id: &str,
        task_id: &str,
        expected: TaskStatus,
        new_status: TaskStatus,
        artifacts: Option<FileMap>,
    ) -> Result<Checkpoint, StateError> {
        self.mutate(project_id, |state| {
            state.apply_transition(task_id, expected, new_status, artifacts)
        })
    }

    fn restore(&self, project_id: &str, sequence: u64) -> Result<ProjectState, StateError> {
        self.mutate(project_id, |state| {
            state.restore_to(sequence)?;
            Ok(state.clone())
        })
    }

    fn list_projects(&self) -> Result<Vec<String>, StateError> {
        let mut ids: Vec<String> = lock_recover(&self.projects).keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// File name of a project's head record.
pub const HEAD_FILE: &str = "state.json";
/// File name of a project's checkpoint log.
pub const LOG_FILE: &str = "checkpoints.jsonl";
/// Directory holding one file per succeeded task.
pub const ARTIFACTS_DIR: &str = "artifacts";
const LOCK_FILE: &str = ".lock";

/// The small, frequently rewritten part of a project record.
#[derive(Debug, Serialize, Deserialize)]
struct ProjectHead {
    project_id: String,
    statuses: StatusMap,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest: Option<Checkpoint>,
}

/// One line of the checkpoint log: what changed since the previous line.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    sequence: u64,
    timestamp: DateTime<Utc>,
    stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    changed: StatusMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    removed: Vec<String>,
}

impl CheckpointRecord {
    fn diff(previous: Option<&StatusMap>, checkpoint: &Checkpoint) -> Self {
        let empty = StatusMap::new();
        let previous = previous.unwrap_or(&empty);

        Self {
            sequence: checkpoint.sequence,
            timestamp: checkpoint.timestamp,
            stage: checkpoint.stage.clone(),
            task_id: checkpoint.task_id.clone(),
            changed: checkpoint
                .statuses
                .iter()
                .filter(|(id, status)| previous.get(*id) != Some(*status))
                .map(|(id, status)| (id.clone(), *status))
                .collect(),
            removed: previous
                .keys()
                .filter(|id| !checkpoint.statuses.contains_key(*id))
                .cloned()
                .collect(),
        }
    }

    fn into_checkpoint(self, previous: Option<&StatusMap>) -> Checkpoint {
        let mut statuses = previous.cloned().unwrap_or_default();
        for id in &self.removed {
            statuses.remove(id);
        }
        statuses.extend(self.changed);

        Checkpoint {
            sequence: self.sequence,
            timestamp: self.timestamp,
            stage: self.stage,
            task_id: self.task_id,
            statuses,
        }
    }
}

/// Accepted files of one task.
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactRecord {
    task_id: String,
    files: FileMap,
}

/// How much of a project record to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    /// Status map and latest checkpoint only
    Head,
    /// Full checkpoint history and every artifact
    Full,
}

/// File-backed state store.
///
/// Each project gets its own directory under the root:
///
/// ```text
/// <root>/<encoded id>/state.json          status map and latest checkpoint
/// <root>/<encoded id>/checkpoints.jsonl   one line per checkpoint, changes only
/// <root>/<encoded id>/artifacts/*.json    accepted files, one per task
/// ```
///
/// A transition rewrites the head, appends one log line, and writes at most
/// one artifact file, so its cost does not grow with the history. The head
/// goes through a temp file and a rename. Log lines past the head's latest
/// sequence are left over from an interrupted write and ignored on replay.
/// An advisory lock file serializes writers across processes; the mutex
/// serializes them within this one.
#[derive(Debug)]
pub struct FileStateStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

/// Holds an exclusive advisory lock until dropped.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_not_found(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound
}

fn parse_json<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, StateError> {
    serde_json::from_str(content).map_err(|source| StateError::CheckpointCorruption {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `content` to `path` through a synced temp file and a rename.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StateError> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp).map_err(io_error(&tmp))?;
    file.write_all(content).map_err(io_error(&tmp))?;
    file.sync_all().map_err(io_error(&tmp))?;
    drop(file);
    fs::rename(&tmp, path).map_err(io_error(path))
}

/// Treat a missing file or directory as already removed.
fn ignore_missing(result: std::io::Result<()>, path: &Path) -> Result<(), StateError> {
    match result {
        Err(e) if !is_not_found(&e) => Err(io_error(path)(e)),
        _ => Ok(()),
    }
}

fn remove_if_present(path: &Path) -> Result<(), StateError> {
    ignore_missing(fs::remove_file(path), path)
}

impl FileStateStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the project records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one project's record.
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(encode_id(project_id))
    }

    fn artifact_path(dir: &Path, task_id: &str) -> PathBuf {
        dir.join(ARTIFACTS_DIR)
            .join(format!("{}.json", encode_id(task_id)))
    }

    fn to_json<T: Serialize>(project_id: &str, value: &T) -> Result<String, StateError> {
        serde_json::to_string(value).map_err(|source| StateError::Serialize {
            project_id: project_id.to_string(),
            source,
        })
    }

    fn acquire(&self, dir: &Path) -> Result<LockGuard, StateError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StateError::Lock {
                path: path.clone(),
                source,
            })?;
        FileExt::lock_exclusive(&file).map_err(|source| StateError::Lock { path, source })?;
        Ok(LockGuard { file })
    }

    fn read_head(&self, project_id: &str) -> Result<ProjectHead, StateError> {
        let path = self.project_dir(project_id).join(HEAD_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => parse_json(&path, &content),
            Err(e) if is_not_found(&e) => Err(StateError::NotFound {
                project_id: project_id.to_string(),
            }),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// Replay the checkpoint log into full checkpoints, up to `upto`.
    fn read_log(dir: &Path, upto: Option<u64>) -> Result<Vec<Checkpoint>, StateError> {
        let path = dir.join(LOG_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(source) => return Err(StateError::Io { path, source }),
        };

        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: CheckpointRecord = parse_json(&path, line)?;
            // A repeated sequence replaces lines an interrupted write left behind
            while checkpoints
                .last()
                .is_some_and(|c| c.sequence >= record.sequence)
            {
                checkpoints.pop();
            }
            let previous = checkpoints.last().map(|c| &c.statuses);
            let checkpoint = record.into_checkpoint(previous);
            checkpoints.push(checkpoint);
        }

        if let Some(upto) = upto {
            checkpoints.retain(|c| c.sequence <= upto);
        }
        Ok(checkpoints)
    }

    fn read_artifacts(dir: &Path) -> Result<BTreeMap<String, FileMap>, StateError> {
        let artifacts_dir = dir.join(ARTIFACTS_DIR);
        let entries = match fs::read_dir(&artifacts_dir) {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StateError::Io {
                    path: artifacts_dir,
                    source,
                });
            }
        };

        let mut artifacts = BTreeMap::new();
        for entry in entries {
            let path = entry.map_err(io_error(&artifacts_dir))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(io_error(&path))?;
            let record: ArtifactRecord = parse_json(&path, &content)?;
            artifacts.insert(record.task_id, record.files);
        }
        Ok(artifacts)
    }

    fn read(&self, project_id: &str, depth: Depth) -> Result<ProjectState, StateError> {
        let head = self.read_head(project_id)?;
        let dir = self.project_dir(project_id);

        let (checkpoints, artifacts): (Vec<Checkpoint>, BTreeMap<String, FileMap>) = match depth {
            Depth::Head => (head.latest.into_iter().collect(), BTreeMap::new()),
            Depth::Full => (
                Self::read_log(&dir, head.latest.as_ref().map(|c| c.sequence))?,
                Self::read_artifacts(&dir)?,
            ),
        };

        Ok(ProjectState {
            project_id: head.project_id,
            statuses: head.statuses,
            artifacts,
            checkpoints,
            created_at: head.created_at,
            updated_at: head.updated_at,
        })
    }

    /// Write everything that changed between `before` and `after`.
    ///
    /// Log lines go first and the head last, so the head never names a
    /// checkpoint the log does not hold.
    fn persist(
        &self,
        dir: &Path,
        before: Option<&ProjectState>,
        after: &ProjectState,
    ) -> Result<(), StateError> {
        let project_id = after.project_id.as_str();
        let last_sequence = before.and_then(|b| b.latest_checkpoint()).map(|c| c.sequence);

        let mut previous = before
            .and_then(|b| b.latest_checkpoint())
            .map(|c| &c.statuses);
        let mut lines = String::new();
        for checkpoint in after
            .checkpoints
            .iter()
            .filter(|c| last_sequence.is_none_or(|seq| c.sequence > seq))
        {
            let record = CheckpointRecord::diff(previous, checkpoint);
            lines.push_str(&Self::to_json(project_id, &record)?);
            lines.push('\n');
            previous = Some(&checkpoint.statuses);
        }

        if !lines.is_empty() {
            let path = dir.join(LOG_FILE);
            let mut log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_error(&path))?;
            log.write_all(lines.as_bytes()).map_err(io_error(&path))?;
            log.sync_data().map_err(io_error(&path))?;
        }

        let no_artifacts = BTreeMap::new();
        let old_artifacts = before.map_or(&no_artifacts, |b| &b.artifacts);
        for (task_id, files) in &after.artifacts {
            if old_artifacts.get(task_id) == Some(files) {
                continue;
            }
            let path = Self::artifact_path(dir, task_id);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_error(parent))?;
            }
            let record = ArtifactRecord {
                task_id: task_id.clone(),
                files: files.clone(),
            };
            write_atomic(&path, Self::to_json(project_id, &record)?.as_bytes())?;
        }

        // A head-only read starts without artifacts, so also drop the files
        // of tasks that stopped being succeeded
        let mut stale: Vec<&String> = Vec::new();
        if let Some(before) = before {
            stale.extend(
                before
                    .artifacts
                    .keys()
                    .filter(|id| !after.artifacts.contains_key(*id)),
            );
            stale.extend(
                before
                    .statuses
                    .iter()
                    .filter(|(id, status)| {
                        status.is_success()
                            && after.status(id) != Some(TaskStatus::Succeeded)
                            && !after.artifacts.contains_key(*id)
                    })
                    .map(|(id, _)| id),
            );
        }
        for task_id in stale {
            remove_if_present(&Self::artifact_path(dir, task_id))?;
        }

        let head = ProjectHead {
            project_id: after.project_id.clone(),
            statuses: after.statuses.clone(),
            created_at: after.created_at,
            updated_at: after.updated_at,
            latest: after.latest_checkpoint().cloned(),
        };
        let content = serde_json::to_string_pretty(&head).map_err(|source| {
            StateError::Serialize {
                project_id: project_id.to_string(),
                source,
            }
        })?;
        write_atomic(&dir.join(HEAD_FILE), content.as_bytes())
    }

    fn mutate<T>(
        &self,
        project_id: &str,
        depth: Depth,
        f: impl FnOnce(&mut ProjectState) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let _guard = lock_recover(&self.write_lock);
        let dir = self.project_dir(project_id);
        let _lock = self.acquire(&dir)?;

        let before = self.read(project_id, depth)?;
        let mut after = before.clone();
        let out = f(&mut after)?;
        self.persist(&dir, Some(&before), &after)?;
        Ok(out)
    }
}

/// Map an id onto a file name.
///
/// ASCII letters, digits, `-` and `_` are kept; every other byte becomes
/// `%XX`. Distinct ids always map to distinct names.
fn encode_id(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{:02X}", byte);
        }
    }
    encoded
}

impl StateStore for FileStateStore {
    fn load(&self, project_id: &str) -> Result<ProjectState, StateError> {
        self.read(project_id, Depth::Full)
    }

    fn exists(&self, project_id: &str) -> Result<bool, StateError> {
        Ok(self.project_dir(project_id).join(HEAD_FILE).exists())
    }

    fn create(&self, project_id: &str, task_ids: &[String]) -> Result<ProjectState, StateError> {
        let _guard = lock_recover(&self.write_lock);
        let dir = self.project_dir(project_id);
        let _lock = self.acquire(&dir)?;

        remove_if_present(&dir.join(LOG_FILE))?;
        let artifacts_dir = dir.join(ARTIFACTS_DIR);
        ignore_missing(fs::remove_dir_all(&artifacts_dir), &artifacts_dir)?;

        let state = ProjectState::new(project_id, task_ids.iter().cloned());
        self.persist(&dir, None, &state)?;
        Ok(state)
    }

    fn resume(&self, project_id: &str, task_ids: &[String]) -> Result<ProjectState, StateError> {
        self.mutate(project_id, Depth::Full, |state| {
            state.reconcile(task_ids);
            Ok(state.clone())
        })
    }

    fn transition(
        &self,
        project_id: &str,
        task_id: &str,
        expected: TaskStatus,
        new_status: TaskStatus,
        artifacts: Option<FileMap>,
    ) -> Result<Checkpoint, StateError> {
        self.mutate(project_id, Depth::Head, |state| {
            state.apply_transition(task_id, expected, new_status, artifacts)
        })
    }

    fn latest_checkpoint(&self, project_id: &str) -> Result<Checkpoint, StateError> {
        self.read_head(project_id)?
            .latest
            .ok_or_else(|| StateError::CheckpointNotFound {
                project_id: project_id.to_string(),
                sequence: 0,
            })
    }

    fn restore(&self, project_id: &str, sequence: u64) -> Result<ProjectState, StateError> {
        self.mutate(project_id, Depth::Full, |state| {
            state.restore_to(sequence)?;
            Ok(state.clone())
        })
    }

    fn list_projects(&self) -> Result<Vec<String>, StateError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_error(&self.root))?.path().join(HEAD_FILE);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if is_not_found(&e) => continue,
                Err(source) => return Err(StateError::Io { path, source }),
            };
            let head: ProjectHead = parse_json(&path, &content)?;
            ids.push(head.project_id);
        }
        ids.sort();
        Ok(ids)
    }
}
