//! `ReportGenerator`: derives Markdown reports purely from `TaskStore` +
//! `SessionLog`. Read-only -- never mutates either.

use std::path::{Path, PathBuf};

use crate::graph::DependencyGraph;
use crate::session_log::reader::{phase_boundaries, terminal_verdict_per_task, worker_iteration_counts};
use crate::session_log::{SessionLogReader, SessionLogRecord};
use crate::store::{RunStore, TaskStore};
use crate::task::{Task, TaskState};

pub struct ReportGenerator {
    reports_root: PathBuf,
    task_store: TaskStore,
    run_store: RunStore,
}

impl ReportGenerator {
    pub fn new(reports_root: impl Into<PathBuf>, task_store: TaskStore, run_store: RunStore) -> Self {
        Self {
            reports_root: reports_root.into(),
            task_store,
            run_store,
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.reports_root.join(session_id)
    }

    /// Write every report for `session_id`: planning, task breakdown,
    /// per-task scope/execution/review, and the summary.
    pub fn generate(
        &self,
        session_id: &str,
        instruction: &str,
        sessions_root: &Path,
    ) -> anyhow::Result<()> {
        let reader = SessionLogReader::new(sessions_root.join(format!("{session_id}.jsonl")));
        let records = reader.read_all().unwrap_or_default();

        let all_tasks = self.task_store.list()?;
        let session_tasks: Vec<Task> = all_tasks
            .into_iter()
            .filter(|t| t.root_session_id == session_id)
            .collect();

        self.write_planning_report(session_id, instruction, &records)?;
        self.write_task_breakdown_report(session_id, &session_tasks)?;
        for task in &session_tasks {
            self.write_task_reports(session_id, task, &records)?;
        }
        self.write_summary_report(session_id, &session_tasks, &records)?;

        Ok(())
    }

    fn write_planning_report(
        &self,
        session_id: &str,
        instruction: &str,
        records: &[SessionLogRecord],
    ) -> anyhow::Result<()> {
        let base_branch = records.iter().find_map(|r| match r {
            SessionLogRecord::SessionStart { base_branch, .. } => Some(base_branch.clone()),
            _ => None,
        });

        let mut body = String::new();
        body.push_str("# Planning\n\n");
        body.push_str("## Instruction\n\n");
        body.push_str(instruction);
        body.push_str("\n\n");
        if let Some(base) = base_branch {
            body.push_str(&format!("## Base branch\n\n`{base}`\n\n"));
        }

        let created: Vec<&str> = records
            .iter()
            .filter_map(|r| match r {
                SessionLogRecord::TaskCreated { task_id, .. } => Some(task_id.as_str()),
                _ => None,
            })
            .collect();
        body.push_str("## Accepted task breakdown\n\n");
        for task_id in created {
            body.push_str(&format!("- `{task_id}`\n"));
        }

        self.write(session_id, "00-planning.md", &body)
    }

    fn write_task_breakdown_report(&self, session_id: &str, tasks: &[Task]) -> anyhow::Result<()> {
        let graph = DependencyGraph::build(tasks, &Default::default());
        let levels = graph.execution_levels();
        let chains = graph.serial_chains();

        let mut body = String::new();
        body.push_str("# Task Breakdown\n\n## Execution levels\n\n");
        body.push_str("| Level | Tasks |\n|---|---|\n");
        for (idx, level) in levels.iter().enumerate() {
            body.push_str(&format!("| {idx} | {} |\n", level.join(", ")));
        }

        body.push_str("\n## Serial chains\n\n");
        if chains.is_empty() {
            body.push_str("None.\n");
        } else {
            for chain in &chains {
                body.push_str(&format!("- {}\n", chain.join(" -> ")));
            }
        }

        self.write(session_id, "01-task-breakdown.md", &body)
    }

    fn write_task_reports(
        &self,
        session_id: &str,
        task: &Task,
        records: &[SessionLogRecord],
    ) -> anyhow::Result<()> {
        let dir = format!("tasks/{}", task.id);

        let mut scope = String::new();
        scope.push_str(&format!("# Scope: {}\n\n", task.id));
        scope.push_str(&format!("**Acceptance:** {}\n\n", task.acceptance));
        scope.push_str(&format!("**Context:** {}\n\n", task.context));
        if !task.scope_paths.is_empty() {
            scope.push_str("**Scope paths:**\n\n");
            for path in &task.scope_paths {
                scope.push_str(&format!("- `{path}`\n"));
            }
        }
        self.write(session_id, &format!("{dir}/00-scope.md"), &scope)?;

        let runs = self.run_store.list_for_task(&task.id).unwrap_or_default();
        let mut execution = String::new();
        execution.push_str(&format!("# Execution: {}\n\n", task.id));
        let iterations = worker_iteration_counts(records);
        execution.push_str(&format!(
            "Iterations observed: {}\n\n",
            iterations.get(&task.id).copied().unwrap_or(0)
        ));
        for run in &runs {
            execution.push_str(&format!(
                "## Run `{}`\n\n- status: {:?}\n- started: {}\n",
                run.id, run.status, run.started_at
            ));
            if let Some(err) = &run.error_message {
                execution.push_str(&format!("- error: {err}\n"));
            }
            execution.push('\n');
        }
        self.write(session_id, &format!("{dir}/01-execution.md"), &execution)?;

        let mut review = String::new();
        review.push_str(&format!("# Review: {}\n\n", task.id));
        let verdicts = terminal_verdict_per_task(records);
        if let Some(verdict) = verdicts.get(&task.id) {
            review.push_str(&format!(
                "- success: {}\n- should_continue: {}\n- should_replan: {}\n- reason: {}\n",
                verdict.success, verdict.should_continue, verdict.should_replan, verdict.reason
            ));
        } else {
            review.push_str("No judge verdict recorded.\n");
        }
        if let Some(feedback) = &task.judgement_feedback {
            review.push_str(&format!(
                "\n## Last continuation feedback\n\n{} (iteration {}/{})\n",
                feedback.last_reason, feedback.iteration, feedback.max_iterations
            ));
        }
        self.write(session_id, &format!("{dir}/02-review.md"), &review)
    }

    fn write_summary_report(
        &self,
        session_id: &str,
        tasks: &[Task],
        records: &[SessionLogRecord],
    ) -> anyhow::Result<()> {
        let count = |state: TaskState| tasks.iter().filter(|t| t.state == state).count();

        let boundaries = phase_boundaries(records);
        let wall_time = boundaries
            .iter()
            .filter_map(|b| b.completed_at.map(|end| end - b.started_at))
            .fold(chrono::Duration::zero(), |acc, d| acc + d);

        let integration_outcome = records.iter().rev().find_map(|r| match r {
            SessionLogRecord::SessionComplete { outcome, .. } => Some(outcome.clone()),
            _ => None,
        });

        let mut body = String::new();
        body.push_str(&format!("# Summary: {session_id}\n\n"));
        body.push_str(&format!("- completed: {}\n", count(TaskState::Done)));
        body.push_str(&format!("- blocked: {}\n", count(TaskState::Blocked)));
        body.push_str(&format!("- cancelled: {}\n", count(TaskState::Cancelled)));
        body.push_str(&format!(
            "- replanned: {}\n",
            count(TaskState::ReplacedByReplan)
        ));
        body.push_str(&format!(
            "- integration outcome: {}\n",
            integration_outcome.unwrap_or_else(|| "unresolved".to_string())
        ));
        body.push_str(&format!("- total wall time: {wall_time}\n"));

        self.write(session_id, "summary.md", &body)
    }

    fn write(&self, session_id: &str, relative: &str, body: &str) -> anyhow::Result<()> {
        let path = self.session_dir(session_id).join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_log::SessionLog;
    use crate::task::TaskType;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    #[test]
    fn generate_writes_every_report_file() {
        let coord = TempDir::new().unwrap();
        let task_store = TaskStore::new(coord.path());
        let run_store = RunStore::new(coord.path());

        let mut task = Task::new(
            "t1", "repo", "feat/t1", "main", "works", "ctx",
            TaskType::Implementation, BTreeSet::new(), "s1", "s1", Utc::now(),
        );
        task.state = TaskState::Done;
        task_store.create(&task).unwrap();

        let log = SessionLog::new(coord.path().join("sessions"), "s1");
        log.log(&crate::session_log::SessionLogRecord::SessionStart {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            root_session_id: "s1".into(),
            instruction: "do the thing".into(),
            base_branch: "main".into(),
        })
        .unwrap();

        let reports_root = coord.path().join("reports");
        let generator = ReportGenerator::new(&reports_root, task_store, run_store);
        generator
            .generate("s1", "do the thing", &coord.path().join("sessions"))
            .unwrap();

        assert!(reports_root.join("s1/00-planning.md").exists());
        assert!(reports_root.join("s1/01-task-breakdown.md").exists());
        assert!(reports_root.join("s1/tasks/t1/00-scope.md").exists());
        assert!(reports_root.join("s1/tasks/t1/01-execution.md").exists());
        assert!(reports_root.join("s1/tasks/t1/02-review.md").exists());
        assert!(reports_root.join("s1/summary.md").exists());
    }
}
