//! `gator resolve <task-id>` command: clear a BLOCKED task's escalation and
//! return it to READY so the next `dispatch` run picks it up again.

use anyhow::{Context, Result, bail};

use gator_core::config::Config;
use gator_core::store::TaskStore;
use gator_core::task::TaskState;

/// Move `task_id` from BLOCKED back to READY, clearing its block message.
pub fn run_resolve(config: &Config, task_id: &str) -> Result<()> {
    let task_store = TaskStore::new(&config.root);
    let task = task_store
        .read(task_id)
        .with_context(|| format!("no such task: {task_id}"))?;

    if task.state != TaskState::Blocked {
        bail!(
            "task {task_id} is {}, not BLOCKED -- nothing to resolve",
            task.state
        );
    }

    let expected_version = task.version;
    task_store.update_cas(task_id, expected_version, |t| {
        t.state = TaskState::Ready;
        t.block_message = None;
        Ok(())
    })?;

    println!("Task {task_id} resolved and returned to READY.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gator_core::task::{Task, TaskType};
    use std::collections::BTreeSet;

    fn config_in(root: std::path::PathBuf) -> Config {
        let mut config = Config::default();
        config.root = root;
        config
    }

    #[test]
    fn resolve_moves_blocked_task_to_ready() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path().to_path_buf());
        let store = TaskStore::new(&config.root);

        let mut task = Task::new(
            "t1",
            "repo",
            "gator/t1",
            "main",
            "accept",
            "ctx",
            TaskType::Implementation,
            BTreeSet::new(),
            "session-1",
            "session-1",
            Utc::now(),
        );
        task.state = TaskState::Blocked;
        task.block_message = Some("escalated to user; awaiting resolution".to_string());
        store.create(&task).unwrap();

        run_resolve(&config, "t1").unwrap();

        let updated = store.read("t1").unwrap();
        assert_eq!(updated.state, TaskState::Ready);
        assert!(updated.block_message.is_none());
    }

    #[test]
    fn resolve_rejects_non_blocked_task() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path().to_path_buf());
        let store = TaskStore::new(&config.root);

        let task = Task::new(
            "t1",
            "repo",
            "gator/t1",
            "main",
            "accept",
            "ctx",
            TaskType::Implementation,
            BTreeSet::new(),
            "session-1",
            "session-1",
            Utc::now(),
        );
        store.create(&task).unwrap();

        let err = run_resolve(&config, "t1").unwrap_err();
        assert!(err.to_string().contains("not BLOCKED"));
    }
}
