//! `Integrator`: merges DONE task branches onto an integration branch and
//! finalizes according to `integration.method`.

use std::process::Command as StdCommand;
use std::sync::Arc;

use chrono::Utc;

use crate::config::IntegrationMethod;
use crate::error::TaskStoreError;
use crate::store::TaskStore;
use crate::task::{PendingConflictResolution, Task, TaskState, TaskType};
use crate::vcs::{MergeOutcome, VcsDriver, VcsError};

/// One task branch that was merged successfully.
#[derive(Debug, Clone)]
pub struct MergedTask {
    pub task_id: String,
    pub branch: String,
}

/// A task branch whose merge conflicted; a conflict-resolution task was
/// spawned for it.
#[derive(Debug, Clone)]
pub struct ConflictedTask {
    pub task_id: String,
    pub branch: String,
    pub conflict_task_id: String,
}

/// How a finalized integration should be completed, per `integration.method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizationOutcome {
    /// The exact shell command the user must run to merge the integration
    /// branch onto the base branch.
    Command { command: String },
    /// A pull request was opened for the integration branch.
    PullRequest { url: String },
    /// `method = pr` was requested but the repository has no remote.
    NoRemote,
}

/// Outcome of one `Integrator::run` pass.
#[derive(Debug, Clone)]
pub struct IntegrationOutcome {
    pub integration_branch: String,
    pub merged: Vec<MergedTask>,
    pub conflicted: Vec<ConflictedTask>,
    pub finalization: Option<FinalizationOutcome>,
}

impl IntegrationOutcome {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }
}

pub struct Integrator {
    vcs: Arc<dyn VcsDriver>,
    task_store: TaskStore,
}

impl Integrator {
    pub fn new(vcs: Arc<dyn VcsDriver>, task_store: TaskStore) -> Self {
        Self { vcs, task_store }
    }

    /// Merge every DONE task in `tasks` (already filtered to the current
    /// session) onto a fresh integration branch off `base_branch`, in
    /// deterministic order (`created_at`, ties by `id`), and finalize per
    /// `method`.
    ///
    /// Zero tasks is a legal, successful no-op: an integration branch is
    /// still created, but nothing is merged and finalization is skipped.
    pub fn run(
        &self,
        session_id: &str,
        base_branch: &str,
        tasks: &[Task],
        method: IntegrationMethod,
    ) -> Result<IntegrationOutcome, TaskStoreError> {
        let integration_branch = format!("integration/{session_id}");
        self.vcs
            .create_branch(&integration_branch, base_branch)
            .map_err(vcs_to_store_err)?;

        let mut done: Vec<&Task> = tasks.iter().filter(|t| t.state == TaskState::Done).collect();
        done.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let worktree = self
            .vcs
            .create_worktree(&integration_branch, false)
            .map_err(vcs_to_store_err)?;

        let mut merged = Vec::new();
        let mut conflicted = Vec::new();

        for task in done {
            match self
                .vcs
                .merge(&worktree.path, &task.branch)
                .map_err(vcs_to_store_err)?
            {
                MergeOutcome::Success { merged_files } => {
                    merged.push(MergedTask {
                        task_id: task.id.clone(),
                        branch: task.branch.clone(),
                    });
                    tracing::info!(
                        task_id = %task.id,
                        files = merged_files.len(),
                        "merged task branch into integration branch"
                    );
                }
                MergeOutcome::Conflicts { files } => {
                    self.vcs.abort_merge(&worktree.path).map_err(vcs_to_store_err)?;

                    let conflict_task_id = format!("{}-conflict-resolve", task.id);
                    let temp_branch = format!("{integration_branch}/resolve/{}", task.id);

                    self.create_conflict_resolution_task(
                        &conflict_task_id,
                        &temp_branch,
                        task,
                        &files,
                    )?;

                    self.task_store.update_cas(&task.id, task.version, {
                        let conflict_task_id = conflict_task_id.clone();
                        let temp_branch = temp_branch.clone();
                        move |t| {
                            t.state = TaskState::Blocked;
                            t.block_message = Some("merge conflict during integration".to_string());
                            t.pending_conflict_resolution = Some(PendingConflictResolution {
                                conflict_task_id: conflict_task_id.clone(),
                                temp_branch: temp_branch.clone(),
                            });
                            Ok(())
                        }
                    })?;

                    conflicted.push(ConflictedTask {
                        task_id: task.id.clone(),
                        branch: task.branch.clone(),
                        conflict_task_id,
                    });
                }
            }
        }

        let finalization = if conflicted.is_empty() && !merged.is_empty() {
            Some(self.finalize(&integration_branch, base_branch, method)?)
        } else if conflicted.is_empty() && merged.is_empty() {
            None
        } else {
            None
        };

        Ok(IntegrationOutcome {
            integration_branch,
            merged,
            conflicted,
            finalization,
        })
    }

    fn create_conflict_resolution_task(
        &self,
        conflict_task_id: &str,
        temp_branch: &str,
        original: &Task,
        conflicts: &[crate::vcs::ConflictedFile],
    ) -> Result<(), TaskStoreError> {
        let scope_paths = conflicts.iter().map(|c| c.file_path.clone()).collect();
        let now = Utc::now();
        let mut task = Task::new(
            conflict_task_id,
            original.repo.clone(),
            temp_branch,
            original.base_branch.clone(),
            "conflicts resolved and compile/tests pass",
            format!(
                "Resolve merge conflicts from integrating task `{}` ({} file(s)): {}",
                original.id,
                conflicts.len(),
                conflicts
                    .iter()
                    .map(|c| c.file_path.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            TaskType::Implementation,
            Default::default(),
            original.root_session_id.clone(),
            original.session_id.clone(),
            now,
        );
        task.scope_paths = scope_paths;
        self.task_store.create(&task)
    }

    fn finalize(
        &self,
        integration_branch: &str,
        base_branch: &str,
        method: IntegrationMethod,
    ) -> Result<FinalizationOutcome, TaskStoreError> {
        let has_remote = self.vcs.has_remote().map_err(vcs_to_store_err)?;

        let resolved_method = match method {
            IntegrationMethod::Auto => {
                if has_remote {
                    IntegrationMethod::Pr
                } else {
                    IntegrationMethod::Command
                }
            }
            other => other,
        };

        match resolved_method {
            IntegrationMethod::Command => Ok(FinalizationOutcome::Command {
                command: format!("git checkout {base_branch} && git merge {integration_branch}"),
            }),
            IntegrationMethod::Pr => {
                if !has_remote {
                    return Ok(FinalizationOutcome::NoRemote);
                }
                match open_pull_request(self.vcs.repo_path(), integration_branch, base_branch) {
                    Ok(url) => Ok(FinalizationOutcome::PullRequest { url }),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to open pull request via gh CLI");
                        Ok(FinalizationOutcome::Command {
                            command: format!(
                                "git checkout {base_branch} && git merge {integration_branch}"
                            ),
                        })
                    }
                }
            }
            IntegrationMethod::Auto => unreachable!("resolved above"),
        }
    }
}

fn open_pull_request(
    repo_path: &std::path::Path,
    head: &str,
    base: &str,
) -> anyhow::Result<String> {
    let output = StdCommand::new("gh")
        .args(["pr", "create", "--head", head, "--base", base, "--fill"])
        .current_dir(repo_path)
        .output()?;
    if !output.status.success() {
        anyhow::bail!(
            "gh pr create failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn vcs_to_store_err(e: VcsError) -> TaskStoreError {
    TaskStoreError::Io(std::io::Error::other(e.to_string()))
}
