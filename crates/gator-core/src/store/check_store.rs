//! `CheckStore`: append-only file-per-record store for [`Check`] results.

use std::path::PathBuf;

use crate::check::Check;
use crate::error::TaskStoreError;

use super::{atomic_write_json, read_json};

#[derive(Debug, Clone)]
pub struct CheckStore {
    root: PathBuf,
}

impl CheckStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn checks_dir(&self) -> PathBuf {
        self.root.join("checks")
    }

    fn check_path(&self, id: &str) -> PathBuf {
        self.checks_dir().join(format!("{id}.json"))
    }

    pub fn create(&self, check: &Check) -> Result<(), TaskStoreError> {
        let path = self.check_path(&check.id);
        if path.exists() {
            return Err(TaskStoreError::AlreadyExists(check.id.clone()));
        }
        atomic_write_json(&path, check)
    }

    pub fn read(&self, id: &str) -> Result<Check, TaskStoreError> {
        read_json(&self.check_path(id), id)
    }

    pub fn list_for_task(&self, task_id: &str) -> Result<Vec<Check>, TaskStoreError> {
        let dir = self.checks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut checks = Vec::new();
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
            match read_json::<Check>(&path, &id) {
                Ok(check) if check.task_id == task_id => checks.push(check),
                Ok(_) => {}
                Err(e) => tracing::warn!(id = %id, error = %e, "skipping unparsable check record"),
            }
        }
        Ok(checks)
    }
}
