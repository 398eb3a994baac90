//! `Worker`: runs one agent invocation on a task inside an isolated
//! worktree, records the [`Run`], executes deterministic [`Check`] commands,
//! and commits the result.

use std::path::PathBuf;
use std::process::Command as StdCommand;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::agent_harness::{run_to_completion, AgentEvent, HarnessRegistry, MaterializedTask};
use crate::check::Check;
use crate::error::{AgentError, TaskStoreError};
use crate::presets;
use crate::run::{Run, RunStatus};
use crate::store::{CheckStore, RunStore};
use crate::task::{JudgementFeedback, Task};
use crate::vcs::VcsDriver;

/// Everything a [`PromptTemplate`] needs to render a task's prompt.
#[derive(Debug, Clone)]
pub struct WorkerPromptInputs<'a> {
    pub task: &'a Task,
    pub iteration: u32,
    pub max_iterations: u32,
    pub feedback: Option<&'a JudgementFeedback>,
    pub check_failures: Vec<&'a Check>,
}

/// Renders a task's prompt text. Swappable so callers can supply richer
/// project-specific wording without touching `Worker` itself.
pub trait PromptTemplate: Send + Sync {
    fn render(&self, inputs: &WorkerPromptInputs<'_>) -> String;
}

/// The default plain-text prompt template.
#[derive(Debug, Default)]
pub struct PlainPromptTemplate;

impl PromptTemplate for PlainPromptTemplate {
    fn render(&self, inputs: &WorkerPromptInputs<'_>) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "Task: {}\n\nAcceptance criteria:\n{}\n\nContext:\n{}\n",
            inputs.task.id, inputs.task.acceptance, inputs.task.context
        ));

        if !inputs.task.scope_paths.is_empty() {
            prompt.push_str("\nScope paths:\n");
            for path in &inputs.task.scope_paths {
                prompt.push_str(&format!("- {path}\n"));
            }
        }

        if let Some(feedback) = inputs.feedback {
            prompt.push_str(&format!(
                "\nThis is continuation attempt {} of {}. Previous review said:\n{}\n",
                inputs.iteration, inputs.max_iterations, feedback.last_reason
            ));
            if !feedback.missing_requirements.is_empty() {
                prompt.push_str("Missing requirements:\n");
                for req in &feedback.missing_requirements {
                    prompt.push_str(&format!("- {req}\n"));
                }
            }
        }

        if !inputs.check_failures.is_empty() {
            prompt.push_str("\nThe following checks are currently failing:\n");
            for check in &inputs.check_failures {
                prompt.push_str(&format!(
                    "- `{}` exited {}\n{}\n",
                    check.commands.join(" "),
                    check.exit_code,
                    check.stderr
                ));
            }
        }

        prompt
    }
}

/// Outcome of one `Worker::execute` call.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub run_id: String,
    pub worktree_path: PathBuf,
    pub final_response: String,
    pub checks: Vec<Check>,
}

pub struct Worker {
    vcs: Arc<dyn VcsDriver>,
    harnesses: Arc<HarnessRegistry>,
    run_store: RunStore,
    check_store: CheckStore,
    prompt_template: Arc<dyn PromptTemplate>,
}

impl Worker {
    pub fn new(
        vcs: Arc<dyn VcsDriver>,
        harnesses: Arc<HarnessRegistry>,
        run_store: RunStore,
        check_store: CheckStore,
    ) -> Self {
        Self {
            vcs,
            harnesses,
            run_store,
            check_store,
            prompt_template: Arc::new(PlainPromptTemplate),
        }
    }

    pub fn with_prompt_template(mut self, template: Arc<dyn PromptTemplate>) -> Self {
        self.prompt_template = template;
        self
    }

    /// Run one iteration: create or reuse the task's worktree, assemble the
    /// prompt, spawn the agent to completion, run checks, and commit any
    /// changes. Does not touch `TaskStore` -- the caller (Scheduler/Judge
    /// loop) is responsible for state transitions.
    pub async fn execute(
        &self,
        task: &Task,
        harness_name: &str,
        agent_model: Option<String>,
        iteration: u32,
        max_iterations: u32,
        check_commands: &[Vec<String>],
    ) -> Result<WorkerOutcome, AgentError> {
        let create_branch = !self.vcs.branch_exists(&task.branch).map_err(anyhow::Error::from)?;
        let worktree = self
            .vcs
            .create_worktree(&task.branch, create_branch)
            .map_err(anyhow::Error::from)?;

        let inputs = WorkerPromptInputs {
            task,
            iteration,
            max_iterations,
            feedback: task.judgement_feedback.as_ref(),
            check_failures: Vec::new(),
        };
        let prompt = self.prompt_template.render(&inputs);

        let harness = self
            .harnesses
            .get(harness_name)
            .ok_or_else(|| AgentError::Other(anyhow::anyhow!("unknown harness: {harness_name}")))?;

        let materialized = MaterializedTask {
            task_id: Uuid::new_v4(),
            name: task.id.clone(),
            prompt,
            working_dir: worktree.path.clone(),
            env_vars: Default::default(),
            model: agent_model,
        };

        let run_id = format!("{}-run-{iteration}", task.id);
        let run = Run::started(
            run_id.clone(),
            task.id.clone(),
            harness_name,
            self.run_store.log_path(&run_id).display().to_string(),
            Utc::now(),
        );
        self.run_store
            .create(&run)
            .map_err(|e| AgentError::Other(anyhow::Error::from(e)))?;

        let outcome = run_to_completion(harness.as_ref(), &materialized).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.finish_run(&run_id, RunStatus::Failure, Some(e.to_string()))
                    .map_err(|store_err| AgentError::Other(anyhow::Error::from(store_err)))?;
                return Err(AgentError::Other(e));
            }
        };

        self.write_run_log(&run_id, &outcome.events)
            .map_err(AgentError::Other)?;

        self.vcs.add_all(&worktree.path).map_err(anyhow::Error::from)?;
        let commit_message = format!("{}: iteration {iteration}", task.id);
        match self.vcs.commit(&worktree.path, &commit_message) {
            Ok(()) => {}
            Err(e) => {
                // "nothing to commit" is benign: the agent may have made no
                // working-tree changes (e.g. an investigation task).
                let msg = e.to_string();
                if !msg.contains("nothing to commit") {
                    self.finish_run(&run_id, RunStatus::Failure, Some(msg.clone()))
                        .map_err(|store_err| AgentError::Other(anyhow::Error::from(store_err)))?;
                    return Err(AgentError::Other(anyhow::Error::from(e)));
                }
            }
        }

        let checks = self
            .run_checks(task, &worktree.path, check_commands)
            .map_err(AgentError::Other)?;

        self.finish_run(&run_id, RunStatus::Success, None)
            .map_err(|e| AgentError::Other(anyhow::Error::from(e)))?;

        Ok(WorkerOutcome {
            run_id,
            worktree_path: worktree.path,
            final_response: outcome.final_response,
            checks,
        })
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<Run, TaskStoreError> {
        self.run_store.update(run_id, move |r| {
            r.status = status;
            r.finished_at = Some(Utc::now());
            r.error_message = error_message;
        })
    }

    fn write_run_log(&self, run_id: &str, events: &[AgentEvent]) -> anyhow::Result<()> {
        let log_path = self.run_store.log_path(run_id);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut body = String::new();
        for event in events {
            body.push_str(&format!("{event:?}\n"));
        }
        std::fs::write(log_path, body)?;
        Ok(())
    }

    /// Run each configured check command in `worktree`, record a [`Check`]
    /// per command, and return them all. An empty `check_commands` list
    /// (i.e. `checks.enabled == false`) runs nothing.
    fn run_checks(
        &self,
        task: &Task,
        worktree: &std::path::Path,
        check_commands: &[Vec<String>],
    ) -> anyhow::Result<Vec<Check>> {
        let mut checks = Vec::new();
        for (idx, command) in check_commands.iter().enumerate() {
            let Some((program, args)) = command.split_first() else {
                continue;
            };
            let output = StdCommand::new(program)
                .args(args)
                .current_dir(worktree)
                .output()?;

            let check = Check::new(
                format!("{}-check-{idx}", task.id),
                task.id.clone(),
                command.clone(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            );
            self.check_store.create(&check)?;
            checks.push(check);
        }
        Ok(checks)
    }
}

/// Default check commands for the project type detected at `worktree`, or an
/// empty list if no preset project type is recognized.
pub fn default_check_commands(worktree: &std::path::Path) -> Vec<Vec<String>> {
    let Some(project_type) = presets::detect_project_type(worktree) else {
        return Vec::new();
    };
    presets::presets_for_project_type(&project_type)
        .into_iter()
        .map(|preset| {
            let mut command = vec![preset.command];
            command.extend(preset.args);
            command
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;
    use std::collections::BTreeSet;

    fn mk_task() -> Task {
        Task::new(
            "t1",
            "repo",
            "feat/t1",
            "main",
            "do the thing",
            "some context",
            TaskType::Implementation,
            BTreeSet::new(),
            "s1",
            "s1",
            Utc::now(),
        )
    }

    #[test]
    fn plain_template_includes_acceptance_and_context() {
        let task = mk_task();
        let inputs = WorkerPromptInputs {
            task: &task,
            iteration: 1,
            max_iterations: 3,
            feedback: None,
            check_failures: Vec::new(),
        };
        let rendered = PlainPromptTemplate.render(&inputs);
        assert!(rendered.contains("do the thing"));
        assert!(rendered.contains("some context"));
        assert!(!rendered.contains("continuation attempt"));
    }

    #[test]
    fn plain_template_includes_feedback_on_continuation() {
        let task = mk_task();
        let feedback = JudgementFeedback {
            iteration: 2,
            max_iterations: 3,
            last_reason: "missed an edge case".into(),
            missing_requirements: vec!["handle empty input".into()],
        };
        let inputs = WorkerPromptInputs {
            task: &task,
            iteration: 2,
            max_iterations: 3,
            feedback: Some(&feedback),
            check_failures: Vec::new(),
        };
        let rendered = PlainPromptTemplate.render(&inputs);
        assert!(rendered.contains("continuation attempt 2 of 3"));
        assert!(rendered.contains("missed an edge case"));
        assert!(rendered.contains("handle empty input"));
    }

    #[test]
    fn default_check_commands_empty_for_unknown_project() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(default_check_commands(dir.path()).is_empty());
    }

    #[test]
    fn default_check_commands_nonempty_for_rust_project() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let commands = default_check_commands(dir.path());
        assert!(!commands.is_empty());
    }
}
