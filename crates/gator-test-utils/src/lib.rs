//! Shared test fixtures for gator's orchestration-engine tests.
//!
//! The engine's only external dependencies are the filesystem and `git`, so
//! fixtures here are intentionally simple: a scratch coordination root for
//! the TaskStore/SessionLog, and a scratch git repository for VCSDriver /
//! worktree tests. No database, no containers.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// A coordination root for TaskStore/SessionLog tests: an empty temp
/// directory, dropped (and removed) at the end of the test.
pub struct TestRoot {
    dir: TempDir,
}

impl TestRoot {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp coordination root"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// A scratch git repository with an initial commit on `main`, suitable for
/// worktree/merge/conflict tests.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Initialize a new repo with one commit on `main` containing `README.md`.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp repo dir");
        let path = dir.path();

        run_git(path, &["init", "-b", "main"]);
        run_git(path, &["config", "user.email", "test@example.com"]);
        run_git(path, &["config", "user.name", "Gator Test"]);

        std::fs::write(path.join("README.md"), "test repo\n").expect("write README.md");
        run_git(path, &["add", "."]);
        run_git(path, &["commit", "-m", "initial commit"]);

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `relative_path` inside the repo's working tree.
    pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
        let full = self.path().join(relative_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&full, content).expect("write file");
        full
    }

    /// Stage and commit every pending change on the current branch.
    pub fn commit_all(&self, message: &str) {
        run_git(self.path(), &["add", "-A"]);
        run_git(self.path(), &["commit", "-m", message]);
    }

    /// Create and check out a new branch off the current HEAD.
    pub fn checkout_new_branch(&self, name: &str) {
        run_git(self.path(), &["checkout", "-b", name]);
    }

    pub fn checkout(&self, name: &str) {
        run_git(self.path(), &["checkout", name]);
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {args:?}: {e}"));
    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

/// A deterministic-ish id generator for tests that want stable fixtures
/// instead of random UUIDs.
pub fn fixed_id(seed: &str) -> String {
    format!("test-{seed}")
}
