//! `RunStore`: append-only file-per-record store for [`Run`]s.
//!
//! Runs are created once and then, at most, transition to a terminal
//! status a single time -- that one update goes through the same
//! lock-guarded read-modify-write convention as `TaskStore::update_cas`,
//! just without a caller-supplied expected version (there is only ever one
//! writer per run id: the Worker that started it).

use std::path::PathBuf;

use crate::error::TaskStoreError;
use crate::run::Run;

use super::lock::LockGuard;
use super::{atomic_write_json, read_json};

#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.runs_dir().join(format!("{id}.json"))
    }

    /// Path to the raw agent output log for `id`, e.g. `runs/{id}.log`.
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.runs_dir().join(format!("{id}.log"))
    }

    pub fn create(&self, run: &Run) -> Result<(), TaskStoreError> {
        let path = self.run_path(&run.id);
        if path.exists() {
            return Err(TaskStoreError::AlreadyExists(run.id.clone()));
        }
        atomic_write_json(&path, run)
    }

    pub fn read(&self, id: &str) -> Result<Run, TaskStoreError> {
        read_json(&self.run_path(id), id)
    }

    pub fn list_for_task(&self, task_id: &str) -> Result<Vec<Run>, TaskStoreError> {
        let dir = self.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
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
            match read_json::<Run>(&path, &id) {
                Ok(run) if run.task_id == task_id => runs.push(run),
                Ok(_) => {}
                Err(e) => tracing::warn!(id = %id, error = %e, "skipping unparsable run record"),
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }

    /// Apply `update_fn` to the run record for `id` under its lock. Used to
    /// record the single terminal-status transition.
    pub fn update<F>(&self, id: &str, update_fn: F) -> Result<Run, TaskStoreError>
    where
        F: FnOnce(&mut Run),
    {
        let _guard = LockGuard::acquire(&self.locks_dir(), &format!("run-{id}"))?;
        let mut run = self.read(id)?;
        update_fn(&mut run);
        atomic_write_json(&self.run_path(id), &run)?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunStatus;
    use chrono::Utc;
    use tempfile::TempDir;

    fn mk_run(id: &str, task_id: &str) -> Run {
        Run::started(id, task_id, "claude-code", format!("runs/{id}.log"), Utc::now())
    }

    #[test]
    fn create_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        let run = mk_run("r1", "t1");
        store.create(&run).unwrap();
        assert_eq!(store.read("r1").unwrap(), run);
    }

    #[test]
    fn create_twice_fails_already_exists() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        store.create(&mk_run("r1", "t1")).unwrap();
        let err = store.create(&mk_run("r1", "t1")).unwrap_err();
        assert!(matches!(err, TaskStoreError::AlreadyExists(id) if id == "r1"));
    }

    #[test]
    fn read_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        let err = store.read("missing").unwrap_err();
        assert!(matches!(err, TaskStoreError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn update_sets_terminal_status_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        store.create(&mk_run("r1", "t1")).unwrap();

        let updated = store
            .update("r1", |r| {
                r.status = RunStatus::Success;
                r.finished_at = Some(Utc::now());
            })
            .unwrap();

        assert!(updated.is_terminal());
        assert_eq!(store.read("r1").unwrap().status, RunStatus::Success);
    }

    #[test]
    fn list_for_task_filters_and_sorts_by_start_time() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        let now = Utc::now();

        let mut later = mk_run("r-later", "t1");
        later.started_at = now + chrono::Duration::seconds(5);
        let mut earlier = mk_run("r-earlier", "t1");
        earlier.started_at = now;
        let other_task = mk_run("r-other", "t2");

        store.create(&later).unwrap();
        store.create(&earlier).unwrap();
        store.create(&other_task).unwrap();

        let runs = store.list_for_task("t1").unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "r-earlier");
        assert_eq!(runs[1].id, "r-later");
    }

    #[test]
    fn list_for_task_empty_when_no_runs_dir() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        assert!(store.list_for_task("t1").unwrap().is_empty());
    }

    #[test]
    fn log_path_is_under_runs_dir() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::new(dir.path());
        assert_eq!(store.log_path("r1"), dir.path().join("runs").join("r1.log"));
    }
}
