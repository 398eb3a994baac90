//! Version control abstraction consumed by the Worker and Integrator.
//!
//! Only a git-backed implementation ([`git::GitDriver`]) exists; the trait
//! exists so the rest of the orchestration engine never shells out to `git`
//! directly.

pub mod git;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use git::GitDriver;

/// Errors surfaced by a [`VcsDriver`] implementation.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git {command} failed (exit {code}): {stderr}")]
    GitCommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to run git: {0}")]
    Io(#[source] std::io::Error),

    #[error("repository has no configured remote")]
    NoRemote,

    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("failed to parse git output: {0}")]
    ParseError(String),
}

/// One merged or conflicting file surfaced by [`VcsDriver::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictedFile {
    pub file_path: String,
    pub reason: String,
}

/// Outcome of attempting to merge one branch into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Success { merged_files: Vec<String> },
    Conflicts { files: Vec<ConflictedFile> },
}

/// The three-way content of a conflicted file, as needed to build a
/// conflict-resolution task's prompt.
#[derive(Debug, Clone)]
pub struct ConflictContent {
    pub file_path: String,
    pub ours_content: Option<String>,
    pub theirs_content: Option<String>,
    pub base_content: Option<String>,
    pub their_branch: String,
}

/// Metadata about one registered worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head_commit: String,
    pub bare: bool,
}

/// Version-control operations the orchestrator needs: branch/worktree
/// lifecycle, and merge/conflict inspection. Implemented against a single
/// repository path passed at construction time.
///
/// Every method is blocking (git CLI subprocess calls); callers from async
/// contexts run it via `tokio::task::spawn_blocking`.
pub trait VcsDriver: Send + Sync {
    fn repo_path(&self) -> &Path;

    fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError>;
    fn list_branches(&self) -> Result<Vec<String>, VcsError>;
    fn branch_exists(&self, name: &str) -> Result<bool, VcsError>;
    fn delete_branch(&self, name: &str) -> Result<(), VcsError>;
    fn current_branch(&self, worktree: &Path) -> Result<String, VcsError>;
    fn has_remote(&self) -> Result<bool, VcsError>;

    fn create_worktree(&self, branch: &str, create_branch: bool) -> Result<WorktreeInfo, VcsError>;
    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), VcsError>;
    fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, VcsError>;
    fn prune_worktrees(&self) -> Result<(), VcsError>;

    fn add_all(&self, worktree: &Path) -> Result<(), VcsError>;
    fn commit(&self, worktree: &Path, message: &str) -> Result<(), VcsError>;
    fn push(&self, worktree: &Path, remote: &str, branch: &str) -> Result<(), VcsError>;

    fn merge(&self, worktree: &Path, branch_to_merge: &str) -> Result<MergeOutcome, VcsError>;
    fn abort_merge(&self, worktree: &Path) -> Result<(), VcsError>;
    fn conflicted_files(&self, worktree: &Path) -> Result<Vec<String>, VcsError>;
    fn conflict_content(
        &self,
        worktree: &Path,
        file: &str,
        their_branch: &str,
    ) -> Result<ConflictContent, VcsError>;
}
