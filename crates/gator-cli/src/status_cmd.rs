//! `gator status` command: show session progress and per-task status.

use anyhow::Result;

use gator_core::config::Config;
use gator_core::session_log::SessionPointerManager;
use gator_core::store::TaskStore;
use gator_core::task::{Task, TaskState};

/// Run the status command.
///
/// When `session_id` is `Some`, shows detailed status for that session.
/// When `None`, shows the latest/previous session pointers and a summary
/// across every live task.
pub fn run_status(config: &Config, session_id: Option<&str>) -> Result<()> {
    let task_store = TaskStore::new(&config.root);
    let sessions_root = config.root.join("sessions");
    let pointer_manager = SessionPointerManager::new(&sessions_root);

    match session_id {
        Some(sid) => run_session_status(&task_store, sid),
        None => run_overview(&task_store, &pointer_manager),
    }
}

fn status_icon(state: TaskState) -> &'static str {
    match state {
        TaskState::Ready => ".",
        TaskState::Running => "*",
        TaskState::NeedsContinuation => "~",
        TaskState::Done => "+",
        TaskState::Blocked => "!",
        TaskState::Cancelled => "x",
        TaskState::Skipped => "-",
        TaskState::ReplacedByReplan => ">",
    }
}

fn run_session_status(task_store: &TaskStore, session_id: &str) -> Result<()> {
    let tasks: Vec<Task> = task_store
        .list()?
        .into_iter()
        .filter(|t| t.root_session_id == session_id)
        .collect();

    if tasks.is_empty() {
        println!("No tasks found for session {session_id}.");
        return Ok(());
    }

    let done = tasks.iter().filter(|t| t.state == TaskState::Done).count();
    let blocked = tasks.iter().filter(|t| t.state == TaskState::Blocked).count();
    println!("Session: {session_id}");
    println!("Progress: {done}/{} done, {blocked} blocked", tasks.len());
    println!();
    println!("Tasks:");
    for task in &tasks {
        println!(
            "  [{}] {} ({}){}",
            status_icon(task.state),
            task.id,
            task.state,
            task.block_message
                .as_ref()
                .map(|m| format!(" -- {m}"))
                .unwrap_or_default(),
        );
    }

    Ok(())
}

fn run_overview(task_store: &TaskStore, pointer_manager: &SessionPointerManager) -> Result<()> {
    match pointer_manager.read_latest() {
        Ok(latest) => {
            println!(
                "Latest session: {} ({}, started {})",
                latest.session_id,
                latest.status,
                latest.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Err(_) => println!("No sessions recorded yet."),
    }
    if let Ok(previous) = pointer_manager.read_previous() {
        println!(
            "Previous session: {} ({})",
            previous.session_id, previous.status
        );
    }
    println!();

    let tasks = task_store.list()?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    let mut by_session: std::collections::BTreeMap<&str, Vec<&Task>> = std::collections::BTreeMap::new();
    for task in &tasks {
        by_session.entry(task.root_session_id.as_str()).or_default().push(task);
    }

    println!(
        "{:<38} {:<10} {:>10}",
        "SESSION", "TASKS", "DONE"
    );
    println!("{}", "-".repeat(60));
    for (session, session_tasks) in by_session {
        let done = session_tasks.iter().filter(|t| t.state == TaskState::Done).count();
        println!("{:<38} {:<10} {:>10}", session, session_tasks.len(), done);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_task_state_has_a_distinct_icon() {
        let states = [
            TaskState::Ready,
            TaskState::Running,
            TaskState::NeedsContinuation,
            TaskState::Done,
            TaskState::Blocked,
            TaskState::Cancelled,
            TaskState::Skipped,
            TaskState::ReplacedByReplan,
        ];
        let icons: Vec<&str> = states.iter().map(|s| status_icon(*s)).collect();
        let unique: std::collections::HashSet<&str> = icons.iter().copied().collect();
        assert_eq!(unique.len(), states.len(), "icons must be distinct: {icons:?}");
    }
}
