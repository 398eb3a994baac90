//! `Planner` (initial decomposition) and `Replanner` (mid-session
//! decomposition on task failure). Both drive the same LLM-decomposition
//! machinery, differing only in prompt framing.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_harness::{run_to_completion, HarnessRegistry, MaterializedTask};
use crate::error::AgentError;
use crate::judge::JudgeVerdict;
use crate::task::{Task, TaskType};

/// One task proposed by the Planner/Replanner LLM, before it is
/// materialized into a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBreakdown {
    pub id: String,
    pub acceptance: String,
    pub context: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub scope_paths: Vec<String>,
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Implementation
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TaskBreakdownResponse {
    tasks: Vec<TaskBreakdown>,
}

/// `planning.*` config governing both initial planning and replanning.
#[derive(Debug, Clone)]
pub struct PlanningConfig {
    pub max_tasks: usize,
    pub quality_threshold: f64,
    pub quality_retries: u32,
    pub strict_context_validation: bool,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_tasks: 20,
            quality_threshold: 0.6,
            quality_retries: 5,
            strict_context_validation: false,
        }
    }
}

pub struct Planner {
    harnesses: Arc<HarnessRegistry>,
}

impl Planner {
    pub fn new(harnesses: Arc<HarnessRegistry>) -> Self {
        Self { harnesses }
    }

    /// Produce the initial task breakdown for a session, seeding the
    /// `TaskStore` before execution begins.
    #[allow(clippy::too_many_arguments)]
    pub async fn plan_initial(
        &self,
        instruction: &str,
        repo_path: &Path,
        repo: &str,
        base_branch: &str,
        project_type: Option<&str>,
        config: &PlanningConfig,
        harness_name: &str,
        model: Option<String>,
        session_id: &str,
    ) -> Result<Vec<Task>, AgentError> {
        let prompt = initial_prompt(instruction, base_branch, project_type, config.max_tasks);
        let breakdowns = self
            .decompose_with_quality_retries(&prompt, harness_name, model, config)
            .await?;

        materialize(
            &breakdowns,
            repo_path,
            repo,
            base_branch,
            session_id,
            session_id,
            config.strict_context_validation,
        )
    }

    async fn decompose_with_quality_retries(
        &self,
        prompt: &str,
        harness_name: &str,
        model: Option<String>,
        config: &PlanningConfig,
    ) -> Result<Vec<TaskBreakdown>, AgentError> {
        let harness = self
            .harnesses
            .get(harness_name)
            .ok_or_else(|| AgentError::Other(anyhow::anyhow!("unknown harness: {harness_name}")))?;

        let mut attempt = 0;
        loop {
            let materialized = MaterializedTask {
                task_id: Uuid::new_v4(),
                name: "planning".to_string(),
                prompt: prompt.to_string(),
                working_dir: std::env::temp_dir(),
                env_vars: HashMap::new(),
                model: model.clone(),
            };

            let outcome = run_to_completion(harness.as_ref(), &materialized)
                .await
                .map_err(AgentError::Other)?;

            let breakdowns = parse_breakdowns(&outcome.final_response)?;

            if breakdowns.len() > config.max_tasks {
                return Err(AgentError::ParseFailure(format!(
                    "planner returned {} tasks, exceeding planning.maxTasks={}",
                    breakdowns.len(),
                    config.max_tasks
                )));
            }

            let score = quality_score(&breakdowns);
            if score >= config.quality_threshold || attempt >= config.quality_retries {
                return Ok(breakdowns);
            }
            attempt += 1;
        }
    }

    /// Given a failed task and its verdict, invoke the Planner with a
    /// replanning prompt and return the replacement tasks, already carrying
    /// `session_id`/`root_session_id` inherited from the failed task.
    pub async fn replan(
        &self,
        failed_task: &Task,
        run_log: &str,
        verdict: &JudgeVerdict,
        repo_path: &Path,
        config: &PlanningConfig,
        harness_name: &str,
        model: Option<String>,
    ) -> Result<Vec<Task>, AgentError> {
        let prompt = replan_prompt(failed_task, run_log, verdict, config.max_tasks);
        let breakdowns = self
            .decompose_with_quality_retries(&prompt, harness_name, model, config)
            .await?;

        materialize(
            &breakdowns,
            repo_path,
            &failed_task.repo,
            &failed_task.base_branch,
            &failed_task.root_session_id,
            &failed_task.session_id,
            config.strict_context_validation,
        )
    }
}

/// `Replanner` is the same machinery as `Planner`, exposed as its own type
/// so `OrchestratorLoop` can name the role it's invoking in logs.
pub type Replanner = Planner;

fn initial_prompt(
    instruction: &str,
    base_branch: &str,
    project_type: Option<&str>,
    max_tasks: usize,
) -> String {
    format!(
        "Decompose the following instruction into at most {max_tasks} independent \
         implementation tasks.\n\nInstruction:\n{instruction}\n\nBase branch: {base_branch}\n\
         Project type: {}\n\nRespond with JSON: {{\"tasks\": [{{\"id\": string, \
         \"acceptance\": string, \"context\": string, \"taskType\": string, \
         \"dependencies\": [string], \"scopePaths\": [string]}}]}}\n",
        project_type.unwrap_or("unknown")
    )
}

fn replan_prompt(task: &Task, run_log: &str, verdict: &JudgeVerdict, max_tasks: usize) -> String {
    format!(
        "The following task failed and needs to be decomposed into at most {max_tasks} \
         replacement tasks.\n\nOriginal acceptance:\n{}\n\nRun log:\n{run_log}\n\nJudge \
         verdict: {}\n\nRespond with JSON: {{\"tasks\": [{{\"id\": string, \"acceptance\": \
         string, \"context\": string, \"taskType\": string, \"dependencies\": [string], \
         \"scopePaths\": [string]}}]}}\n",
        task.acceptance, verdict.reason
    )
}

fn parse_breakdowns(text: &str) -> Result<Vec<TaskBreakdown>, AgentError> {
    let candidate = crate::judge::extract_json_block(text);
    let response: TaskBreakdownResponse = serde_json::from_str(&candidate)
        .map_err(|e| AgentError::ParseFailure(format!("invalid task breakdown JSON: {e}")))?;
    Ok(response.tasks)
}

/// Heuristic quality score: fraction of breakdown entries that carry a
/// non-empty acceptance criterion and at least one scope path.
fn quality_score(breakdowns: &[TaskBreakdown]) -> f64 {
    if breakdowns.is_empty() {
        return 0.0;
    }
    let well_formed = breakdowns
        .iter()
        .filter(|b| !b.acceptance.trim().is_empty() && !b.scope_paths.is_empty())
        .count();
    well_formed as f64 / breakdowns.len() as f64
}

fn materialize(
    breakdowns: &[TaskBreakdown],
    repo_path: &Path,
    repo: &str,
    base_branch: &str,
    root_session_id: &str,
    session_id: &str,
    strict_context_validation: bool,
) -> Result<Vec<Task>, AgentError> {
    if strict_context_validation {
        for breakdown in breakdowns {
            for scope_path in &breakdown.scope_paths {
                if scope_path_escapes(scope_path) {
                    return Err(AgentError::ParseFailure(format!(
                        "task {} scope path {scope_path} escapes repository root",
                        breakdown.id
                    )));
                }
            }
        }
    }

    let now = Utc::now();
    let tasks = breakdowns
        .iter()
        .map(|b| {
            let mut task = Task::new(
                b.id.clone(),
                repo,
                format!("gator/{session_id}/{}", b.id),
                base_branch,
                b.acceptance.clone(),
                b.context.clone(),
                b.task_type,
                b.dependencies.iter().cloned().collect::<BTreeSet<_>>(),
                root_session_id,
                session_id,
                now,
            );
            task.scope_paths = b.scope_paths.iter().cloned().collect();
            task
        })
        .collect();
    Ok(tasks)
}

/// True if `scope_path` can leave the repository root: an absolute path, or
/// one containing a `..` component. `Path::join`/`starts_with` are purely
/// lexical and don't resolve `..`, so checking the joined path's prefix is
/// not sufficient -- a traversal component must be rejected directly.
fn scope_path_escapes(scope_path: &str) -> bool {
    let path = Path::new(scope_path);
    path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
}
