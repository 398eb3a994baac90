//! `gator log` command: print the run history and raw agent output for a
//! task.

use anyhow::{Context, Result};

use gator_core::config::Config;
use gator_core::store::{RunStore, TaskStore};

/// Print every run for `task_id`, oldest first, followed by the raw agent
/// log of the most recent run (unless `summary_only`).
pub fn run_log(config: &Config, task_id: &str, summary_only: bool) -> Result<()> {
    let task_store = TaskStore::new(&config.root);
    let run_store = RunStore::new(&config.root);

    let task = task_store
        .read(task_id)
        .with_context(|| format!("no such task: {task_id}"))?;
    println!("Task {task_id} ({})", task.state);

    let runs = run_store.list_for_task(task_id)?;
    if runs.is_empty() {
        println!("No runs recorded for this task yet.");
        return Ok(());
    }

    for run in &runs {
        println!(
            "  run {} [{}] agent={} started={}{}",
            run.id,
            run.status,
            run.agent_type,
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            run.finished_at
                .map(|t| format!(" finished={}", t.format("%Y-%m-%d %H:%M:%S UTC")))
                .unwrap_or_default(),
        );
        if let Some(err) = &run.error_message {
            println!("    error: {err}");
        }
    }

    if summary_only {
        return Ok(());
    }

    if let Some(last) = runs.last() {
        let log_path = run_store.log_path(&last.id);
        println!("\n--- agent output: {} ---", log_path.display());
        match std::fs::read_to_string(&log_path) {
            Ok(contents) => print!("{contents}"),
            Err(e) => println!("(could not read log: {e})"),
        }
    }

    Ok(())
}
