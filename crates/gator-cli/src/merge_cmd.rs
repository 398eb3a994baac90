//! `gator merge <session-id>` command: (re-)run integration for a session,
//! e.g. after resolving conflicts manually.

use std::sync::Arc;

use anyhow::{Context, Result};

use gator_core::config::Config;
use gator_core::integrator::{FinalizationOutcome, Integrator};
use gator_core::store::TaskStore;
use gator_core::task::TaskState;
use gator_core::vcs::{GitDriver, VcsDriver};

/// Run integration for every task belonging to `session_id`.
pub fn run_merge(config: &Config, repo_path: &std::path::Path, session_id: &str) -> Result<()> {
    let task_store = TaskStore::new(&config.root);
    let tasks: Vec<_> = task_store
        .list()?
        .into_iter()
        .filter(|t| t.session_id == session_id || t.root_session_id == session_id)
        .collect();

    if tasks.is_empty() {
        println!("No tasks found for session {session_id}.");
        return Ok(());
    }

    let not_done = tasks
        .iter()
        .filter(|t| t.state != TaskState::Done)
        .count();
    if not_done > 0 {
        println!(
            "Warning: {not_done} task(s) in this session are not DONE; only DONE tasks are merged."
        );
    }

    let vcs: Arc<dyn VcsDriver> =
        Arc::new(GitDriver::new(repo_path, None).context("failed to open repository")?);
    let integrator = Integrator::new(vcs.clone(), task_store);

    let base_branch = vcs.current_branch(repo_path)?;
    let outcome = integrator.run(
        session_id,
        &base_branch,
        &tasks,
        config.integration.method,
    )?;

    println!("Integration branch: {}", outcome.integration_branch);
    println!("Merged: {}", outcome.merged.len());
    for m in &outcome.merged {
        println!("  - {} ({})", m.task_id, m.branch);
    }
    if outcome.has_conflicts() {
        println!("Conflicted: {}", outcome.conflicted.len());
        for c in &outcome.conflicted {
            println!(
                "  - {} ({}) -> conflict-resolution task {}",
                c.task_id, c.branch, c.conflict_task_id
            );
        }
    }
    if let Some(finalization) = &outcome.finalization {
        match finalization {
            FinalizationOutcome::Command { command } => println!("To merge: {command}"),
            FinalizationOutcome::PullRequest { url } => println!("Pull request opened: {url}"),
            FinalizationOutcome::NoRemote => {
                println!("integration.method=pr requested but the repository has no remote")
            }
        }
    }

    Ok(())
}
