//! `gator cleanup` command: remove worktrees for terminal tasks and prune
//! stale worktree metadata.

use anyhow::{Context, Result};

use gator_core::config::Config;
use gator_core::store::TaskStore;
use gator_core::task::TaskState;
use gator_core::vcs::GitDriver;

/// Remove worktrees for tasks in a terminal state (optionally: every task,
/// if `all` is set), then prune git's stale worktree references.
pub fn run_cleanup(config: &Config, repo_path: &std::path::Path, all: bool) -> Result<()> {
    let task_store = TaskStore::new(&config.root);
    let vcs = GitDriver::new(repo_path, None).context("failed to open repository")?;

    let tasks = task_store.list()?;
    let worktrees = vcs.list_worktrees()?;

    let mut removed = 0;
    let mut skipped = 0;

    for task in &tasks {
        let eligible = all || task.state.is_terminal();
        if !eligible {
            skipped += 1;
            continue;
        }

        let Some(worktree) = worktrees
            .iter()
            .find(|w| w.branch.as_deref() == Some(task.branch.as_str()))
        else {
            continue;
        };

        match vcs.remove_worktree(&worktree.path, false) {
            Ok(()) => {
                println!("  Removed: {} ({})", task.id, worktree.path.display());
                removed += 1;
            }
            Err(e) => {
                eprintln!("  Warning: failed to remove worktree for {}: {e}", task.id);
            }
        }
    }

    vcs.prune_worktrees()?;

    println!("\nCleanup complete: {removed} worktree(s) removed, {skipped} skipped.");

    Ok(())
}
