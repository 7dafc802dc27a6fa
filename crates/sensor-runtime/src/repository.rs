//! Persistent step-execution metadata.
//!
//! The runner only relies on three operations: load a step's resume cursor,
//! commit a new cursor atomically, and record a status transition. Both
//! implementations keep one [`StepExecution`] per step name.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use sensor_core::error::{PipelineError, Result};

// ── StepStatus ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::NotStarted => "NOT_STARTED",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// ── StepCursor ────────────────────────────────────────────────────────────────

/// Position of the last committed chunk of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepCursor {
    /// Input items consumed by committed chunks.
    pub read_count: u64,
    /// End-of-stream outputs already committed.
    pub emitted_count: u64,
    /// Output items written by committed chunks.
    pub write_count: u64,
    /// Durable length of the step's output file.
    pub writer_offset: u64,
    pub commit_count: u64,
    /// Serialized processor state at commit time, for stateful processors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_state: Option<serde_json::Value>,
}

// ── StepExecution ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub status: StepStatus,
    #[serde(default)]
    pub cursor: Option<StepCursor>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_message: Option<String>,
}

impl StepExecution {
    fn new() -> Self {
        Self {
            status: StepStatus::NotStarted,
            cursor: None,
            start_time: None,
            end_time: None,
            exit_message: None,
        }
    }
}

// ── JobRepository ─────────────────────────────────────────────────────────────

pub trait JobRepository {
    /// Cursor of the last committed chunk, if any.
    fn load_cursor(&self, step: &str) -> Result<Option<StepCursor>>;

    /// Persist `cursor` atomically. Fails with
    /// [`PipelineError::CommitFailure`] when the store cannot be written, in
    /// which case the previous cursor remains in effect.
    fn commit(&mut self, step: &str, cursor: &StepCursor) -> Result<()>;

    /// Record a status transition, with an optional exit message.
    fn mark_status(&mut self, step: &str, status: StepStatus, message: Option<&str>) -> Result<()>;

    fn step_execution(&self, step: &str) -> Result<Option<StepExecution>>;

    /// Drop every stored step execution.
    fn reset(&mut self) -> Result<()>;
}

// ── RepositoryState ───────────────────────────────────────────────────────────

/// The document shared by both repository implementations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryState {
    #[serde(default)]
    pub steps: BTreeMap<String, StepExecution>,
}

impl RepositoryState {
    fn apply_commit(&mut self, step: &str, cursor: &StepCursor) {
        self.steps
            .entry(step.to_string())
            .or_insert_with(StepExecution::new)
            .cursor = Some(cursor.clone());
    }

    fn apply_status(&mut self, step: &str, status: StepStatus, message: Option<&str>) {
        let execution = self
            .steps
            .entry(step.to_string())
            .or_insert_with(StepExecution::new);
        let now = Utc::now();
        match status {
            StepStatus::Running => {
                execution.start_time = Some(now);
                execution.end_time = None;
            }
            StepStatus::Completed | StepStatus::Failed => execution.end_time = Some(now),
            StepStatus::NotStarted => {}
        }
        execution.status = status;
        execution.exit_message = message.map(str::to_string);
    }
}

// ── InMemoryJobRepository ─────────────────────────────────────────────────────

/// Non-persistent repository; state lives as long as the value.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobRepository {
    state: RepositoryState,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn load_cursor(&self, step: &str) -> Result<Option<StepCursor>> {
        Ok(self.state.steps.get(step).and_then(|e| e.cursor.clone()))
    }

    fn commit(&mut self, step: &str, cursor: &StepCursor) -> Result<()> {
        self.state.apply_commit(step, cursor);
        Ok(())
    }

    fn mark_status(&mut self, step: &str, status: StepStatus, message: Option<&str>) -> Result<()> {
        self.state.apply_status(step, status, message);
        Ok(())
    }

    fn step_execution(&self, step: &str) -> Result<Option<StepExecution>> {
        Ok(self.state.steps.get(step).cloned())
    }

    fn reset(&mut self) -> Result<()> {
        self.state = RepositoryState::default();
        Ok(())
    }
}

// ── FileJobRepository ─────────────────────────────────────────────────────────

/// JSON-file repository.
///
/// Every mutation is applied to a copy, written to a temp file and renamed
/// over the document; the in-memory state only changes once the rename
/// succeeded.
#[derive(Debug)]
pub struct FileJobRepository {
    path: PathBuf,
    state: RepositoryState,
}

impl FileJobRepository {
    /// Open the repository at `path`. A missing file is an empty repository;
    /// an unreadable one is an error, since it holds restart state.
    pub fn open(path: &Path) -> Result<Self> {
        let state = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RepositoryState::default(),
            Err(source) => {
                return Err(PipelineError::FileRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        debug!(path = %path.display(), steps = state.steps.len(), "opened job repository");
        Ok(Self {
            path: path.to_path_buf(),
            state,
        })
    }

    /// Start an empty repository at `path`, replacing whatever document is
    /// there without reading it. Used for `--fresh`, where an unreadable old
    /// document must not block a new job instance.
    pub fn create_empty(path: &Path) -> Result<Self> {
        let mut repo = Self {
            path: path.to_path_buf(),
            state: RepositoryState::default(),
        };
        repo.persist(RepositoryState::default())?;
        debug!(path = %path.display(), "created empty job repository");
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&mut self, next: RepositoryState) -> Result<()> {
        save_state(&self.path, &next)
            .map_err(|e| PipelineError::CommitFailure(format!("{}: {e}", self.path.display())))?;
        self.state = next;
        Ok(())
    }
}

/// Write `state` to a temp file next to `path`, sync it, then rename it into
/// place and sync the directory entry.
fn save_state(path: &Path, state: &RepositoryState) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)?;

    sync_dir(parent.unwrap_or(Path::new(".")))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directory handles cannot be synced on this platform; the rename is the
// durability boundary.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl JobRepository for FileJobRepository {
    fn load_cursor(&self, step: &str) -> Result<Option<StepCursor>> {
        Ok(self.state.steps.get(step).and_then(|e| e.cursor.clone()))
    }

    fn commit(&mut self, step: &str, cursor: &StepCursor) -> Result<()> {
        let mut next = self.state.clone();
        next.apply_commit(step, cursor);
        self.persist(next)
    }

    fn mark_status(&mut self, step: &str, status: StepStatus, message: Option<&str>) -> Result<()> {
        let mut next = self.state.clone();
        next.apply_status(step, status, message);
        self.persist(next)
    }

    fn step_execution(&self, step: &str) -> Result<Option<StepExecution>> {
        Ok(self.state.steps.get(step).cloned())
    }

    fn reset(&mut self) -> Result<()> {
        self.persist(RepositoryState::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cursor(read: u64, offset: u64) -> StepCursor {
        StepCursor {
            read_count: read,
            writer_offset: offset,
            commit_count: read,
            ..Default::default()
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StepStatus::NotStarted.to_string(), "NOT_STARTED");
        assert_eq!(StepStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(
            serde_json::to_string(&StepStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[test]
    fn test_in_memory_commit_and_load() {
        let mut repo = InMemoryJobRepository::new();
        assert!(repo.load_cursor("s").unwrap().is_none());

        repo.commit("s", &cursor(2, 40)).unwrap();
        assert_eq!(repo.load_cursor("s").unwrap(), Some(cursor(2, 40)));
    }

    #[test]
    fn test_status_transitions_set_times_and_message() {
        let mut repo = InMemoryJobRepository::new();
        repo.mark_status("s", StepStatus::Running, None).unwrap();
        let running = repo.step_execution("s").unwrap().unwrap();
        assert_eq!(running.status, StepStatus::Running);
        assert!(running.start_time.is_some());
        assert!(running.end_time.is_none());

        repo.mark_status("s", StepStatus::Failed, Some("Malformed line 2: x"))
            .unwrap();
        let failed = repo.step_execution("s").unwrap().unwrap();
        assert_eq!(failed.status, StepStatus::Failed);
        assert!(failed.end_time.is_some());
        assert_eq!(failed.exit_message.as_deref(), Some("Malformed line 2: x"));
    }

    #[test]
    fn test_file_repository_persists_across_open() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("state").join("repo.json");

        {
            let mut repo = FileJobRepository::open(&path).unwrap();
            repo.mark_status("aggregate", StepStatus::Running, None).unwrap();
            repo.commit("aggregate", &cursor(1, 64)).unwrap();
        }

        let repo = FileJobRepository::open(&path).unwrap();
        assert_eq!(repo.load_cursor("aggregate").unwrap(), Some(cursor(1, 64)));
        assert_eq!(
            repo.step_execution("aggregate").unwrap().unwrap().status,
            StepStatus::Running
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_repository_reset() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("repo.json");

        let mut repo = FileJobRepository::open(&path).unwrap();
        repo.commit("s", &cursor(3, 10)).unwrap();
        repo.reset().unwrap();

        let reopened = FileJobRepository::open(&path).unwrap();
        assert!(reopened.step_execution("s").unwrap().is_none());
    }

    #[test]
    fn test_file_repository_processor_state_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("repo.json");
        let with_state = StepCursor {
            processor_state: Some(serde_json::json!({ "days": { "2024-01-01": [1, 2] } })),
            ..cursor(1, 5)
        };

        let mut repo = FileJobRepository::open(&path).unwrap();
        repo.commit("s", &with_state).unwrap();

        let reopened = FileJobRepository::open(&path).unwrap();
        assert_eq!(reopened.load_cursor("s").unwrap(), Some(with_state));
    }

    #[test]
    fn test_file_repository_unwritable_is_commit_failure() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("repo.json");

        let mut repo = FileJobRepository::open(&path).unwrap();
        repo.commit("s", &cursor(1, 8)).unwrap();

        // A directory squatting on the temp file name makes every save fail.
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let err = repo.commit("s", &cursor(2, 16)).unwrap_err();
        assert!(matches!(err, PipelineError::CommitFailure(_)));
        assert_eq!(repo.load_cursor("s").unwrap(), Some(cursor(1, 8)));

        let err = repo.mark_status("s", StepStatus::Failed, None).unwrap_err();
        assert!(matches!(err, PipelineError::CommitFailure(_)));
        assert!(repo.step_execution("s").unwrap().unwrap().status != StepStatus::Failed);

        drop(repo);
        let reopened = FileJobRepository::open(&path).unwrap();
        assert_eq!(reopened.load_cursor("s").unwrap(), Some(cursor(1, 8)));
    }

    #[test]
    fn test_file_repository_corrupt_document_is_error() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("repo.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(FileJobRepository::open(&path).is_err());
    }

    #[test]
    fn test_create_empty_replaces_torn_document() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("repo.json");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            FileJobRepository::open(&path),
            Err(PipelineError::JsonParse(_))
        ));

        let mut repo = FileJobRepository::create_empty(&path).unwrap();
        assert!(repo.step_execution("s").unwrap().is_none());
        repo.commit("s", &cursor(1, 4)).unwrap();

        let reopened = FileJobRepository::open(&path).unwrap();
        assert_eq!(reopened.load_cursor("s").unwrap(), Some(cursor(1, 4)));
    }

    #[test]
    fn test_create_empty_in_missing_directory() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("state").join("repo.json");

        FileJobRepository::create_empty(&path).unwrap();
        let reopened = FileJobRepository::open(&path).unwrap();
        assert!(reopened.state.steps.is_empty());
    }
}
