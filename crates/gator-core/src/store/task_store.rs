//! `TaskStore`: the sole persistence authority for [`Task`] records.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::TaskStoreError;
use crate::task::Task;

use super::lock::LockGuard;
use super::{atomic_write_json, read_json};

/// A key-addressed JSON file store under a coordination root:
/// `tasks/{id}.json`, with locks in a sibling `.locks/{id}/`.
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}.json"))
    }

    /// Fails with `AlreadyExists` if a record for `task.id` is already
    /// present.
    pub fn create(&self, task: &Task) -> Result<(), TaskStoreError> {
        let path = self.task_path(&task.id);
        if path.exists() {
            return Err(TaskStoreError::AlreadyExists(task.id.clone()));
        }
        atomic_write_json(&path, task)
    }

    pub fn read(&self, id: &str) -> Result<Task, TaskStoreError> {
        read_json(&self.task_path(id), id)
    }

    /// Enumerate every parseable task under `tasks/`. Unparsable files are
    /// skipped with a warning rather than aborting the whole listing.
    pub fn list(&self) -> Result<Vec<Task>, TaskStoreError> {
        let dir = self.tasks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            match read_json::<Task>(&path, &id) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "skipping unparsable task record");
                }
            }
        }
        Ok(tasks)
    }

    pub fn delete(&self, id: &str) -> Result<(), TaskStoreError> {
        let path = self.task_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TaskStoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(TaskStoreError::Io(e)),
        }
    }

    /// Compare-and-swap update: acquire the advisory lock, re-read the
    /// current record, verify `expected_version`, apply `update_fn` to a
    /// copy, bump the version and `updated_at`, publish, release the lock.
    ///
    /// The lock is released via [`LockGuard`]'s `Drop` on every exit path,
    /// including when `update_fn` itself fails -- a failed update never
    /// publishes a partial write and never leaks the lock.
    pub fn update_cas<F>(
        &self,
        id: &str,
        expected_version: u64,
        update_fn: F,
    ) -> Result<Task, TaskStoreError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskStoreError>,
    {
        let _guard = LockGuard::acquire(&self.locks_dir(), id)?;

        let current = self.read(id)?;
        if current.version != expected_version {
            return Err(TaskStoreError::ConcurrentModification {
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = current.clone();
        update_fn(&mut updated)?;
        updated.version = current.version + 1;
        updated.updated_at = Utc::now();

        atomic_write_json(&self.task_path(id), &updated)?;
        Ok(updated)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
