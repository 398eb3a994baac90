//! `gator report <session-id>` command: regenerate the Markdown reports for
//! a session from its persisted task and session-log state.

use anyhow::Result;

use gator_core::config::Config;
use gator_core::report::ReportGenerator;
use gator_core::store::{RunStore, TaskStore};
use gator_core::task::TaskState;

/// Regenerate and print the location of every report for `session_id`.
pub fn run_report(config: &Config, session_id: &str, instruction: &str) -> Result<()> {
    let task_store = TaskStore::new(&config.root);
    let run_store = RunStore::new(&config.root);
    let sessions_root = config.root.join("sessions");
    let reports_root = config.root.join("reports");

    let generator = ReportGenerator::new(&reports_root, task_store.clone(), run_store);
    generator.generate(session_id, instruction, &sessions_root)?;

    let tasks = task_store.list()?;
    let session_tasks: Vec<_> = tasks
        .into_iter()
        .filter(|t| t.root_session_id == session_id)
        .collect();
    let done = session_tasks
        .iter()
        .filter(|t| t.state == TaskState::Done)
        .count();

    println!("Reports written to {}", reports_root.join(session_id).display());
    println!("Tasks: {done}/{} done", session_tasks.len());

    Ok(())
}
