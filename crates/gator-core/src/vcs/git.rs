//! `git`-backed [`VcsDriver`] implementation.
//!
//! Every operation shells out to the `git` CLI. Git serializes its own
//! access to the shared object store via a lock file, but running two
//! mutating commands from this process at once can still race on stdout
//! parsing, so mutating operations are additionally serialized through an
//! internal mutex.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use super::{ConflictContent, ConflictedFile, MergeOutcome, VcsDriver, VcsError, WorktreeInfo};

#[derive(Debug, Clone)]
pub struct GitDriver {
    repo_path: PathBuf,
    worktree_base: PathBuf,
    git_lock: Arc<Mutex<()>>,
}

impl GitDriver {
    /// Open `repo_path` as a git repository. Worktrees are placed under a
    /// sibling `<repo-name>-gator-worktrees/` directory unless
    /// `worktree_base` is given.
    pub fn new(repo_path: impl Into<PathBuf>, worktree_base: Option<PathBuf>) -> Result<Self, VcsError> {
        let repo_path = repo_path.into();

        let output = run(&repo_path, &["rev-parse", "--git-dir"])?;
        if !output.status.success() {
            return Err(VcsError::NotAGitRepo(repo_path));
        }

        let worktree_base = worktree_base.unwrap_or_else(|| {
            let repo_name = repo_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("repo");
            let base_name = format!("{repo_name}-gator-worktrees");
            repo_path
                .parent()
                .map(|p| p.join(&base_name))
                .unwrap_or_else(|| PathBuf::from(base_name))
        });

        Ok(Self {
            repo_path,
            worktree_base,
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn worktree_base(&self) -> &Path {
        &self.worktree_base
    }

    fn worktree_path_for_branch(&self, branch: &str) -> PathBuf {
        self.worktree_base.join(branch.replace('/', "--"))
    }
}

fn run(dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(VcsError::Io)
}

fn run_ok(dir: &Path, command: &str, args: &[&str]) -> Result<Output, VcsError> {
    let output = run(dir, args)?;
    if !output.status.success() {
        return Err(VcsError::GitCommandFailed {
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(output)
}

fn stdout_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl VcsDriver for GitDriver {
    fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        run_ok(&self.repo_path, "branch", &["branch", name, base])?;
        Ok(())
    }

    fn list_branches(&self) -> Result<Vec<String>, VcsError> {
        let output = run_ok(
            &self.repo_path,
            "branch --list",
            &["branch", "--format=%(refname:short)"],
        )?;
        Ok(stdout_string(&output)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn branch_exists(&self, name: &str) -> Result<bool, VcsError> {
        let output = run(
            &self.repo_path,
            &["rev-parse", "--verify", &format!("refs/heads/{name}")],
        )?;
        Ok(output.status.success())
    }

    fn delete_branch(&self, name: &str) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let output = run(&self.repo_path, &["branch", "-D", name])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") {
            return Ok(());
        }
        Err(VcsError::GitCommandFailed {
            command: "branch -D".into(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.to_string(),
        })
    }

    fn current_branch(&self, worktree: &Path) -> Result<String, VcsError> {
        let output = run_ok(worktree, "rev-parse --abbrev-ref HEAD", &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(stdout_string(&output))
    }

    fn has_remote(&self) -> Result<bool, VcsError> {
        let output = run_ok(&self.repo_path, "remote", &["remote"])?;
        Ok(!stdout_string(&output).is_empty())
    }

    fn create_worktree(&self, branch: &str, create_branch: bool) -> Result<WorktreeInfo, VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.worktree_path_for_branch(branch);

        if let Ok(existing) = self.find_worktree_by_path(&path) {
            return Ok(existing);
        }

        std::fs::create_dir_all(&self.worktree_base).map_err(VcsError::Io)?;

        let output = if create_branch {
            run(&self.repo_path, &["worktree", "add", "-b", branch, path.to_str().unwrap_or_default()])?
        } else {
            run(
                &self.repo_path,
                &["worktree", "add", path.to_str().unwrap_or_default(), branch],
            )?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let _ = std::fs::remove_dir_all(&path);
            return Err(VcsError::GitCommandFailed {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        self.find_worktree_by_path(&path)
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        let path_str = path.to_str().unwrap_or_default();
        args.push(path_str);

        let output = run(&self.repo_path, &args)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is not a working tree") {
            return Ok(());
        }
        Err(VcsError::GitCommandFailed {
            command: "worktree remove".into(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.to_string(),
        })
    }

    fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, VcsError> {
        let output = run_ok(
            &self.repo_path,
            "worktree list",
            &["worktree", "list", "--porcelain"],
        )?;
        Ok(parse_porcelain(&stdout_string(&output)))
    }

    fn prune_worktrees(&self) -> Result<(), VcsError> {
        run_ok(&self.repo_path, "worktree prune", &["worktree", "prune"])?;
        Ok(())
    }

    fn add_all(&self, worktree: &Path) -> Result<(), VcsError> {
        run_ok(worktree, "add -A", &["add", "-A"])?;
        Ok(())
    }

    fn commit(&self, worktree: &Path, message: &str) -> Result<(), VcsError> {
        run_ok(worktree, "commit", &["commit", "-m", message])?;
        Ok(())
    }

    fn push(&self, worktree: &Path, remote: &str, branch: &str) -> Result<(), VcsError> {
        run_ok(worktree, "push", &["push", remote, branch])?;
        Ok(())
    }

    fn merge(&self, worktree: &Path, branch_to_merge: &str) -> Result<MergeOutcome, VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let before = run_ok(worktree, "diff --name-only", &["diff", "--name-only", "HEAD"])
            .map(|o| stdout_string(&o))
            .unwrap_or_default();
        let _ = before;

        let output = run(worktree, &["merge", "--no-ff", "--no-commit", branch_to_merge])?;
        if output.status.success() {
            run_ok(worktree, "commit", &["commit", "--no-edit"])?;
            let merged = run_ok(
                worktree,
                "diff --name-only HEAD@{1}",
                &["diff", "--name-only", "HEAD@{1}", "HEAD"],
            )
            .map(|o| stdout_string(&o).lines().map(str::to_string).collect())
            .unwrap_or_default();
            return Ok(MergeOutcome::Success { merged_files: merged });
        }

        let stdout = stdout_string(&output);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stdout.contains("CONFLICT") || stderr.contains("CONFLICT") || stderr.contains("Automatic merge failed") {
            let files = self.conflicted_files(worktree)?;
            let conflicts = files
                .into_iter()
                .map(|f| ConflictedFile {
                    file_path: f,
                    reason: "content conflict".to_string(),
                })
                .collect();
            return Ok(MergeOutcome::Conflicts { files: conflicts });
        }

        Err(VcsError::GitCommandFailed {
            command: "merge".into(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }

    fn abort_merge(&self, worktree: &Path) -> Result<(), VcsError> {
        run_ok(worktree, "merge --abort", &["merge", "--abort"])?;
        Ok(())
    }

    fn conflicted_files(&self, worktree: &Path) -> Result<Vec<String>, VcsError> {
        let output = run_ok(
            worktree,
            "diff --name-only --diff-filter=U",
            &["diff", "--name-only", "--diff-filter=U"],
        )?;
        Ok(stdout_string(&output)
            .lines()
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn conflict_content(
        &self,
        worktree: &Path,
        file: &str,
        their_branch: &str,
    ) -> Result<ConflictContent, VcsError> {
        let show_stage = |stage: u8| -> Option<String> {
            let output = run(worktree, &["show", &format!(":{stage}:{file}")]).ok()?;
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                None
            }
        };

        Ok(ConflictContent {
            file_path: file.to_string(),
            base_content: show_stage(1),
            ours_content: show_stage(2),
            theirs_content: show_stage(3),
            their_branch: their_branch.to_string(),
        })
    }
}

impl GitDriver {
    fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, VcsError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for wt in self.list_worktrees()? {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }
        Err(VcsError::ParseError(format!(
            "worktree not found at path: {}",
            path.display()
        )))
    }
}

/// Parse `git worktree list --porcelain` blocks into [`WorktreeInfo`]s.
fn parse_porcelain(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head: Option<String> = None;
    let mut branch: Option<String> = None;
    let mut bare = false;

    let mut flush = |path: &mut Option<PathBuf>,
                     head: &mut Option<String>,
                     branch: &mut Option<String>,
                     bare: &mut bool,
                     out: &mut Vec<WorktreeInfo>| {
        if let (Some(p), Some(h)) = (path.take(), head.take()) {
            out.push(WorktreeInfo {
                path: p,
                branch: branch.take(),
                head_commit: h,
                bare: *bare,
            });
        }
        *bare = false;
    };

    for line in output.lines() {
        if line.is_empty() {
            flush(&mut path, &mut head, &mut branch, &mut bare, &mut worktrees);
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string());
        } else if line == "bare" {
            bare = true;
        }
    }
    flush(&mut path, &mut head, &mut branch, &mut bare, &mut worktrees);

    worktrees
}
