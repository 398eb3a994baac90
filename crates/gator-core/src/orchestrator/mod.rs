//! `OrchestratorLoop`: the single entry point that drives one session from
//! instruction to a terminal [`SessionOutcome`] -- planning, then rounds of
//! execution and integration.
//!
//! The loop is the sole mutator of scheduler bookkeeping (`runningWorkers`)
//! and of every `TaskStore` record: spawned per-task futures run a worker
//! and, on success, a judge, then report back over a `tokio::mpsc` channel
//! rather than touching the store themselves.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::check::Check;
use crate::config::{CheckFailureModeConfig, Config, LoopAction};
use crate::escalation::{EscalationEngine, EscalationOutcome, EscalationTarget};
use crate::graph::DependencyGraph;
use crate::integrator::{IntegrationOutcome, Integrator};
use crate::judge::{CheckFailureMode, Judge, JudgeVerdict, VerdictAction};
use crate::loop_detector::LoopDetector;
use crate::presets;
use crate::replanner::{Planner, PlanningConfig};
use crate::report::ReportGenerator;
use crate::scheduler::Scheduler;
use crate::session_log::{
    SessionLog, SessionLogReader, SessionLogRecord, SessionPointer, SessionPointerManager,
};
use crate::store::{CheckStore, RunStore, TaskStore};
use crate::task::{JudgementFeedback, ReplanningInfo, Task, TaskState};
use crate::vcs::VcsDriver;
use crate::worker::{self, Worker};
use crate::agent_harness::HarnessRegistry;
use crate::error::AgentError;

/// Sentinel `block_message` set on a task escalated all the way to the
/// user, so a resumed session can tell it apart from an ordinary block.
const AWAITING_USER_BLOCK_MESSAGE: &str = "escalated to user; awaiting resolution";

/// Terminal outcome of one `OrchestratorLoop::run` call.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Every task reached DONE and the integration branch merged cleanly.
    Completed {
        session_id: String,
        integration: IntegrationOutcome,
    },
    /// The planner produced zero tasks for the instruction; nothing to do.
    CompletedNoTasks { session_id: String },
    /// The orchestration rounds were exhausted while integration conflicts
    /// remained unresolved.
    IntegrationConflicts {
        session_id: String,
        integration: IntegrationOutcome,
    },
    /// A task escalated all the way to the user; the session is paused.
    AwaitingUser { session_id: String, reason: String },
    /// The session could not converge (a task is blocked for a reason
    /// other than a pending conflict, or the main loop ran out of rounds).
    Failed { session_id: String, reason: String },
    /// An external interrupt (Ctrl-C) cancelled the session; every
    /// non-terminal task was marked CANCELLED.
    Cancelled { session_id: String },
}

impl SessionOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            SessionOutcome::Completed { session_id, .. }
            | SessionOutcome::CompletedNoTasks { session_id }
            | SessionOutcome::IntegrationConflicts { session_id, .. }
            | SessionOutcome::AwaitingUser { session_id, .. }
            | SessionOutcome::Failed { session_id, .. }
            | SessionOutcome::Cancelled { session_id } => session_id,
        }
    }

    /// CLI process exit code: 0 success, 1 unrecoverable failure, 2
    /// integration finished with conflicts, 3 blocked on a pending user
    /// escalation.
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionOutcome::Completed { .. } | SessionOutcome::CompletedNoTasks { .. } => 0,
            SessionOutcome::IntegrationConflicts { .. } => 2,
            SessionOutcome::AwaitingUser { .. } => 3,
            SessionOutcome::Failed { .. } => 1,
            SessionOutcome::Cancelled { .. } => 130,
        }
    }
}

fn outcome_status(outcome: &SessionOutcome) -> &'static str {
    match outcome {
        SessionOutcome::Completed { .. } | SessionOutcome::CompletedNoTasks { .. } => "completed",
        SessionOutcome::IntegrationConflicts { .. } => "integration_conflicts",
        SessionOutcome::AwaitingUser { .. } => "awaiting_user",
        SessionOutcome::Failed { .. } => "failed",
        SessionOutcome::Cancelled { .. } => "cancelled",
    }
}

fn non_empty(model: &str) -> Option<String> {
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}

fn to_judge_failure_mode(mode: CheckFailureModeConfig) -> CheckFailureMode {
    match mode {
        CheckFailureModeConfig::Block => CheckFailureMode::Block,
        CheckFailureModeConfig::Warn => CheckFailureMode::Warn,
    }
}

/// What a spawned worker/judge attempt reports back to the loop.
struct TaskCompletion {
    task_id: String,
    worker_id: String,
    final_response: Option<String>,
    payload: TaskPayload,
}

enum TaskPayload {
    WorkerFailed(AgentError),
    ChecksBlocked(Vec<Check>),
    JudgeFailed(AgentError),
    Judged(JudgeVerdict),
}

/// Drives one coding-agent session: planning, then rounds of concurrent
/// task execution and branch integration, to a terminal [`SessionOutcome`].
///
/// Every sub-component is filesystem-backed and stateless across calls --
/// the loop itself holds no mutable state beyond the `Scheduler`'s
/// in-memory running-worker set, so a process restart simply resumes from
/// whatever the `TaskStore` and session log already reflect.
pub struct OrchestratorLoop {
    config: Config,
    repo_path: PathBuf,
    repo: String,
    base_branch: String,
    vcs: Arc<dyn VcsDriver>,
    harnesses: Arc<HarnessRegistry>,

    task_store: TaskStore,
    sessions_root: PathBuf,

    scheduler: Scheduler,
    worker: Arc<Worker>,
    judge: Arc<Judge>,
    planner: Planner,
    escalation: EscalationEngine,
    integrator: Integrator,
    loop_detector: LoopDetector,
    report_generator: ReportGenerator,
    pointer_manager: SessionPointerManager,
    cancel: tokio_util::sync::CancellationToken,
}

impl OrchestratorLoop {
    pub fn new(
        config: Config,
        repo_path: impl Into<PathBuf>,
        repo: impl Into<String>,
        base_branch: impl Into<String>,
        vcs: Arc<dyn VcsDriver>,
        harnesses: Arc<HarnessRegistry>,
    ) -> Self {
        let repo_path = repo_path.into();
        let root = config.root.clone();
        let sessions_root = root.join("sessions");
        let reports_root = root.join("reports");

        let task_store = TaskStore::new(&root);
        let run_store = RunStore::new(&root);
        let check_store = CheckStore::new(&root);

        let scheduler = Scheduler::new(task_store.clone(), config.max_workers);
        let worker = Arc::new(Worker::new(
            Arc::clone(&vcs),
            Arc::clone(&harnesses),
            run_store.clone(),
            check_store.clone(),
        ));
        let judge = Arc::new(Judge::new(Arc::clone(&harnesses), config.judge_task_retries));
        let planner = Planner::new(Arc::clone(&harnesses));
        let escalation = EscalationEngine::new(Arc::clone(&harnesses), config.escalation_limits.clone());
        let integrator = Integrator::new(Arc::clone(&vcs), task_store.clone());
        let loop_detection = &config.loop_detection;
        let loop_detector = LoopDetector::new(
            loop_detection.enabled,
            loop_detection.max_step_iterations.worker,
            loop_detection.similarity_detection.threshold,
            loop_detection.similarity_detection.window_size,
            loop_detection.transition_pattern_detection.min_occurrences,
            loop_detection.on_loop.default,
        );
        let report_generator = ReportGenerator::new(&reports_root, task_store.clone(), run_store.clone());
        let pointer_manager = SessionPointerManager::new(&sessions_root);

        Self {
            config,
            repo_path,
            repo: repo.into(),
            base_branch: base_branch.into(),
            vcs,
            harnesses,
            task_store,
            sessions_root,
            scheduler,
            worker,
            judge,
            planner,
            escalation,
            integrator,
            loop_detector,
            report_generator,
            pointer_manager,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Run `instruction` to a terminal outcome, resuming the latest session
    /// if it was left mid-flight.
    ///
    /// Installs a Ctrl-C handler for the duration of the call: an external
    /// interrupt drains in-flight workers (bounded grace period) before
    /// marking every non-terminal task of this session CANCELLED.
    pub async fn run(&self, instruction: &str) -> anyhow::Result<SessionOutcome> {
        let cancel = self.cancel.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received interrupt, cancelling session");
                cancel.cancel();
            }
        });
        let outcome = self.run_inner(instruction).await;
        ctrl_c.abort();
        outcome
    }

    async fn run_inner(&self, instruction: &str) -> anyhow::Result<SessionOutcome> {
        let (session_id, resumed) = self.open_or_resume_session()?;
        let root_session_id = session_id.clone();
        let log = SessionLog::new(&self.sessions_root, &session_id);

        if !resumed {
            self.pointer_manager.update_latest(SessionPointer {
                session_id: session_id.clone(),
                started_at: Utc::now(),
                status: "planning".to_string(),
            })?;
            log.log(&SessionLogRecord::SessionStart {
                timestamp: Utc::now(),
                session_id: session_id.clone(),
                root_session_id: root_session_id.clone(),
                instruction: instruction.to_string(),
                base_branch: self.base_branch.clone(),
            })?;
        }

        let outcome = match self.run_session(instruction, &session_id, &root_session_id, &log).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log.log(&SessionLogRecord::SessionAbort {
                    timestamp: Utc::now(),
                    session_id: session_id.clone(),
                    reason: e.to_string(),
                })?;
                self.pointer_manager.update_status(&session_id, "failed")?;
                return Err(e);
            }
        };

        let status = outcome_status(&outcome);
        self.pointer_manager.update_status(&session_id, status)?;
        log.log(&SessionLogRecord::SessionComplete {
            timestamp: Utc::now(),
            session_id: session_id.clone(),
            outcome: status.to_string(),
        })?;
        self.report_generator.generate(&session_id, instruction, &self.sessions_root)?;

        Ok(outcome)
    }

    fn open_or_resume_session(&self) -> Result<(String, bool), crate::error::SessionLogError> {
        match self.pointer_manager.read_latest() {
            Ok(pointer) if pointer.status == "planning" || pointer.status == "executing" => {
                Ok((pointer.session_id, true))
            }
            _ => Ok((format!("session-{}", Uuid::new_v4()), false)),
        }
    }

    fn planning_config(&self) -> PlanningConfig {
        PlanningConfig {
            max_tasks: self.config.planning.max_tasks,
            quality_threshold: self.config.planning.quality_threshold / 100.0,
            quality_retries: self.config.planner_quality_retries,
            strict_context_validation: self.config.planning.strict_context_validation,
        }
    }

    async fn run_session(
        &self,
        instruction: &str,
        session_id: &str,
        root_session_id: &str,
        log: &SessionLog,
    ) -> anyhow::Result<SessionOutcome> {
        let existing = self.task_store.list()?;
        let has_tasks = existing.iter().any(|t| t.root_session_id == root_session_id);

        if !has_tasks {
            log.log(&SessionLogRecord::PhaseStart {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                phase: "planning".to_string(),
            })?;

            let project_type = presets::detect_project_type(&self.repo_path);
            let planning_config = self.planning_config();
            let harness = self.config.agents.planner.kind.harness_name();
            let model = non_empty(&self.config.agents.planner.model);

            let tasks = self
                .planner
                .plan_initial(
                    instruction,
                    &self.repo_path,
                    &self.repo,
                    &self.base_branch,
                    project_type.as_deref(),
                    &planning_config,
                    harness,
                    model,
                    session_id,
                )
                .await?;

            if tasks.is_empty() {
                log.log(&SessionLogRecord::PhaseComplete {
                    timestamp: Utc::now(),
                    session_id: session_id.to_string(),
                    phase: "planning".to_string(),
                })?;
                return Ok(SessionOutcome::CompletedNoTasks {
                    session_id: session_id.to_string(),
                });
            }

            for task in &tasks {
                self.task_store.create(task)?;
                log.log(&SessionLogRecord::TaskCreated {
                    timestamp: Utc::now(),
                    session_id: session_id.to_string(),
                    task_id: task.id.clone(),
                })?;
            }
            log.log(&SessionLogRecord::PhaseComplete {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                phase: "planning".to_string(),
            })?;
        }

        self.pointer_manager.update_status(session_id, "executing")?;

        let mut last_integration: Option<IntegrationOutcome> = None;

        for round in 0..self.config.orchestrate_main_loop.max(1) {
            let exec_phase = format!("execution-{round}");
            log.log(&SessionLogRecord::PhaseStart {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                phase: exec_phase.clone(),
            })?;
            self.run_execution_round(log, session_id, root_session_id).await?;
            log.log(&SessionLogRecord::PhaseComplete {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                phase: exec_phase,
            })?;

            if self.cancel.is_cancelled() {
                return self.cancel_session(log, session_id, root_session_id);
            }

            let all_tasks = self.task_store.list()?;
            let session_tasks: Vec<Task> = all_tasks
                .into_iter()
                .filter(|t| t.root_session_id == root_session_id)
                .collect();

            if session_tasks.iter().any(|t| {
                t.state == TaskState::Blocked
                    && t.block_message.as_deref() == Some(AWAITING_USER_BLOCK_MESSAGE)
            }) {
                return Ok(SessionOutcome::AwaitingUser {
                    session_id: session_id.to_string(),
                    reason: "one or more tasks are blocked pending user escalation".to_string(),
                });
            }

            let integration_phase = format!("integration-{round}");
            log.log(&SessionLogRecord::PhaseStart {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                phase: integration_phase.clone(),
            })?;
            let outcome = self.integrator.run(
                session_id,
                &self.base_branch,
                &session_tasks,
                self.config.integration.method,
            )?;
            log.log(&SessionLogRecord::PhaseComplete {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                phase: integration_phase,
            })?;

            let has_conflicts = outcome.has_conflicts();
            last_integration = Some(outcome);

            if has_conflicts {
                // Conflict-resolution tasks were created READY; loop back
                // and let a later round execute and re-integrate them.
                continue;
            }

            let other_blocked = session_tasks
                .iter()
                .any(|t| t.state == TaskState::Blocked && t.pending_conflict_resolution.is_none());
            if other_blocked {
                return Ok(SessionOutcome::Failed {
                    session_id: session_id.to_string(),
                    reason: "one or more tasks are blocked and were not recovered by replanning"
                        .to_string(),
                });
            }

            return Ok(SessionOutcome::Completed {
                session_id: session_id.to_string(),
                integration: last_integration.take().expect("just assigned"),
            });
        }

        match last_integration {
            Some(integration) if integration.has_conflicts() => Ok(SessionOutcome::IntegrationConflicts {
                session_id: session_id.to_string(),
                integration,
            }),
            _ => Ok(SessionOutcome::Failed {
                session_id: session_id.to_string(),
                reason: format!(
                    "exceeded {} orchestration round(s) without converging",
                    self.config.orchestrate_main_loop
                ),
            }),
        }
    }

    /// Run claimable tasks concurrently (bounded by `maxWorkers`) until no
    /// task is running and none can be claimed.
    async fn run_execution_round(
        &self,
        log: &SessionLog,
        session_id: &str,
        root_session_id: &str,
    ) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<TaskCompletion>(self.config.max_workers.max(1) * 2 + 1);
        let mut in_flight: usize = 0;
        let mut recent_responses: HashMap<String, Vec<String>> = HashMap::new();
        let check_commands = if self.config.checks.enabled {
            worker::default_check_commands(&self.repo_path)
        } else {
            Vec::new()
        };

        loop {
            if self.cancel.is_cancelled() {
                self.drain_in_flight(&mut rx, in_flight).await;
                break;
            }

            let all_tasks = self.task_store.list()?;
            let session_tasks: Vec<Task> = all_tasks
                .into_iter()
                .filter(|t| t.root_session_id == root_session_id)
                .collect();

            let graph = DependencyGraph::build(&session_tasks, &HashSet::new());
            for id in &graph.cyclic_nodes {
                tracing::warn!(
                    task_id = %id,
                    session_id = %session_id,
                    "task participates in a dependency cycle and is unschedulable"
                );
            }

            let ready = self.scheduler.ready_tasks(&session_tasks);
            let claimable: Vec<Task> = ready
                .into_iter()
                .filter(|t| !graph.is_unschedulable(&t.id))
                .collect();
            let had_candidates = !claimable.is_empty();

            let mut progress_made = false;
            for task in claimable {
                if !self.scheduler.has_free_slot() {
                    break;
                }
                let worker_id = format!("worker-{}", Uuid::new_v4());
                if let Some(claimed) = self.scheduler.claim(&task.id, &worker_id)? {
                    progress_made = true;
                    self.log_task_updated(log, session_id, &claimed)?;
                    in_flight += 1;
                    self.spawn_task_attempt(
                        claimed,
                        worker_id,
                        check_commands.clone(),
                        log.clone(),
                        session_id.to_string(),
                        tx.clone(),
                    );
                }
            }

            if in_flight == 0 {
                if had_candidates && !progress_made {
                    log.log(&SessionLogRecord::LeaderDecision {
                        timestamp: Utc::now(),
                        session_id: session_id.to_string(),
                        reason: "ready tasks exist but none could be claimed this round".to_string(),
                        action: "escalate".to_string(),
                    })?;
                    let harness = self.config.agents.planner.kind.harness_name();
                    let model = non_empty(&self.config.agents.planner.model);
                    let _ = self
                        .escalation
                        .escalate(
                            EscalationTarget::Planner,
                            "orchestrator made no progress this round",
                            None,
                            harness,
                            model,
                        )
                        .await?;
                }
                break;
            }

            tokio::select! {
                completion = rx.recv() => {
                    match completion {
                        Some(completion) => {
                            in_flight -= 1;
                            self.handle_completion(log, session_id, completion, &mut recent_responses)
                                .await?;
                        }
                        None => break,
                    }
                }
                _ = self.cancel.cancelled() => {
                    self.drain_in_flight(&mut rx, in_flight).await;
                    break;
                }
            }
        }

        if let Ok(records) = SessionLogReader::new(log.path()).read_all() {
            if let Some(signal) = self.loop_detector.check_transition_pattern(&records) {
                log.log(&SessionLogRecord::LeaderDecision {
                    timestamp: Utc::now(),
                    session_id: session_id.to_string(),
                    reason: signal.reason,
                    action: format!("{:?}", signal.action),
                })?;
            }
        }

        Ok(())
    }

    /// Spawn the worker (and, on success, the judge) for one claimed task.
    /// Never touches `TaskStore`/`Scheduler` -- reports back over `tx`.
    fn spawn_task_attempt(
        &self,
        task: Task,
        worker_id: String,
        check_commands: Vec<Vec<String>>,
        log: SessionLog,
        session_id: String,
        tx: mpsc::Sender<TaskCompletion>,
    ) {
        let worker = Arc::clone(&self.worker);
        let judge = Arc::clone(&self.judge);
        let worker_harness = self.config.agents.worker.kind.harness_name();
        let worker_model = non_empty(&self.config.agents.worker.model);
        let judge_harness = self.config.agents.judge.kind.harness_name();
        let judge_model = non_empty(&self.config.agents.judge.model);
        let failure_mode = if self.config.checks.enabled {
            Some(to_judge_failure_mode(self.config.checks.failure_mode))
        } else {
            None
        };
        let max_iterations = self.config.loop_detection.max_step_iterations.worker;
        let iteration = task
            .judgement_feedback
            .as_ref()
            .map(|f| f.iteration + 1)
            .unwrap_or(1);
        let task_id = task.id.clone();
        let run_id = format!("{task_id}-run-{iteration}");

        tokio::spawn(async move {
            let _ = log.log(&SessionLogRecord::WorkerStart {
                timestamp: Utc::now(),
                session_id: session_id.clone(),
                task_id: task_id.clone(),
                worker_id: worker_id.clone(),
                run_id: run_id.clone(),
                iteration,
            });

            let result = worker
                .execute(
                    &task,
                    worker_harness,
                    worker_model,
                    iteration,
                    max_iterations,
                    &check_commands,
                )
                .await;

            let completion = match result {
                Err(e) => {
                    let _ = log.log(&SessionLogRecord::WorkerComplete {
                        timestamp: Utc::now(),
                        session_id: session_id.clone(),
                        task_id: task_id.clone(),
                        worker_id: worker_id.clone(),
                        run_id: run_id.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                    TaskCompletion {
                        task_id,
                        worker_id,
                        final_response: None,
                        payload: TaskPayload::WorkerFailed(e),
                    }
                }
                Ok(outcome) => {
                    let _ = log.log(&SessionLogRecord::WorkerComplete {
                        timestamp: Utc::now(),
                        session_id: session_id.clone(),
                        task_id: task_id.clone(),
                        worker_id: worker_id.clone(),
                        run_id: outcome.run_id.clone(),
                        success: true,
                        error: None,
                    });
                    let _ = log.log(&SessionLogRecord::JudgeStart {
                        timestamp: Utc::now(),
                        session_id: session_id.clone(),
                        task_id: task_id.clone(),
                        run_id: outcome.run_id.clone(),
                    });

                    let verdict = judge
                        .evaluate(
                            &task,
                            &outcome.final_response,
                            &outcome.checks,
                            failure_mode,
                            judge_harness,
                            judge_model,
                        )
                        .await;

                    let payload = match verdict {
                        Ok(None) => {
                            let _ = log.log(&SessionLogRecord::JudgeComplete {
                                timestamp: Utc::now(),
                                session_id: session_id.clone(),
                                task_id: task_id.clone(),
                                run_id: outcome.run_id.clone(),
                                success: false,
                                should_continue: false,
                                should_replan: false,
                                reason: "required checks failed under block failure mode".to_string(),
                            });
                            let failing: Vec<Check> =
                                outcome.checks.iter().filter(|c| !c.passed).cloned().collect();
                            TaskPayload::ChecksBlocked(failing)
                        }
                        Ok(Some(v)) => {
                            let _ = log.log(&SessionLogRecord::JudgeComplete {
                                timestamp: Utc::now(),
                                session_id: session_id.clone(),
                                task_id: task_id.clone(),
                                run_id: outcome.run_id.clone(),
                                success: v.success,
                                should_continue: v.should_continue,
                                should_replan: v.should_replan,
                                reason: v.reason.clone(),
                            });
                            TaskPayload::Judged(v)
                        }
                        Err(e) => {
                            let _ = log.log(&SessionLogRecord::Error {
                                timestamp: Utc::now(),
                                session_id: session_id.clone(),
                                context: format!("judge:{task_id}"),
                                message: e.to_string(),
                            });
                            TaskPayload::JudgeFailed(e)
                        }
                    };

                    TaskCompletion {
                        task_id,
                        worker_id,
                        final_response: Some(outcome.final_response),
                        payload,
                    }
                }
            };

            let _ = tx.send(completion).await;
        });
    }

    /// Apply a worker/judge completion to the `TaskStore`, and the
    /// `Scheduler`'s running-worker set -- the only place either is
    /// mutated.
    async fn handle_completion(
        &self,
        log: &SessionLog,
        session_id: &str,
        completion: TaskCompletion,
        recent_responses: &mut HashMap<String, Vec<String>>,
    ) -> anyhow::Result<()> {
        let TaskCompletion {
            task_id,
            worker_id,
            final_response,
            payload,
        } = completion;
        let current = self.task_store.read(&task_id)?;

        match payload {
            TaskPayload::WorkerFailed(e) => {
                log.log(&SessionLogRecord::Error {
                    timestamp: Utc::now(),
                    session_id: session_id.to_string(),
                    context: format!("worker:{task_id}"),
                    message: e.to_string(),
                })?;
                let updated = self.scheduler.block(&task_id, &worker_id, format!("worker failed: {e}"))?;
                self.log_task_updated(log, session_id, &updated)?;
            }
            TaskPayload::ChecksBlocked(failing) => {
                let reason = format!(
                    "required checks failed: {}",
                    failing
                        .iter()
                        .map(|c| c.commands.join(" "))
                        .collect::<Vec<_>>()
                        .join("; ")
                );
                let updated = self.scheduler.block(&task_id, &worker_id, reason)?;
                self.log_task_updated(log, session_id, &updated)?;
            }
            TaskPayload::JudgeFailed(e) => {
                let updated = self.scheduler.block(&task_id, &worker_id, format!("judge failed: {e}"))?;
                self.log_task_updated(log, session_id, &updated)?;
            }
            TaskPayload::Judged(verdict) => {
                if let Some(response) = &final_response {
                    recent_responses
                        .entry(task_id.clone())
                        .or_default()
                        .push(response.clone());
                }

                match verdict.action() {
                    VerdictAction::Complete => {
                        let updated = self.scheduler.complete(&task_id, &worker_id)?;
                        self.log_task_updated(log, session_id, &updated)?;
                    }
                    VerdictAction::Block { reason } => {
                        let updated = self.scheduler.block(&task_id, &worker_id, reason)?;
                        self.log_task_updated(log, session_id, &updated)?;
                    }
                    VerdictAction::Replan { .. } => {
                        self.scheduler.release_worker(&worker_id);
                        let run_log = final_response.clone().unwrap_or_default();
                        self.replan_task(&current, &run_log, &verdict, log, session_id).await?;
                    }
                    VerdictAction::Continue { feedback_reason, missing } => {
                        self.continue_or_escalate(
                            &current,
                            &worker_id,
                            feedback_reason,
                            missing,
                            log,
                            session_id,
                            recent_responses,
                        )
                        .await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Decide whether a `Continue` verdict should actually continue the
    /// task, or whether the loop detector's iteration/similarity checks
    /// call for escalation first.
    async fn continue_or_escalate(
        &self,
        current: &Task,
        worker_id: &str,
        feedback_reason: String,
        mut missing: Vec<String>,
        log: &SessionLog,
        session_id: &str,
        recent_responses: &mut HashMap<String, Vec<String>>,
    ) -> anyhow::Result<()> {
        let iteration = current
            .judgement_feedback
            .as_ref()
            .map(|f| f.iteration + 1)
            .unwrap_or(1);
        let max_iterations = self.config.loop_detection.max_step_iterations.worker;

        let mut signal = self.loop_detector.check_iterations(&current.id, iteration);
        if signal.is_none() {
            if let Some(responses) = recent_responses.get(&current.id) {
                signal = self.loop_detector.check_similarity(&current.id, responses);
            }
        }

        self.scheduler.release_worker(worker_id);

        let Some(signal) = signal else {
            return self.apply_continuation(
                current,
                iteration,
                max_iterations,
                feedback_reason,
                missing,
                log,
                session_id,
            );
        };

        log.log(&SessionLogRecord::LeaderDecision {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            reason: signal.reason.clone(),
            action: format!("{:?}", signal.action),
        })?;

        match signal.action {
            LoopAction::Abort => {
                let updated = self.scheduler.block(&current.id, worker_id, signal.reason)?;
                self.log_task_updated(log, session_id, &updated)?;
            }
            LoopAction::Escalate => {
                let harness = self.config.agents.planner.kind.harness_name();
                let model = non_empty(&self.config.agents.planner.model);
                let outcome = self
                    .escalation
                    .escalate(EscalationTarget::Planner, &signal.reason, Some(&current.id), harness, model)
                    .await?;
                self.apply_escalation_outcome(current, outcome, log, session_id).await?;
            }
            LoopAction::ForceContinue => {
                self.apply_continuation(
                    current,
                    iteration,
                    max_iterations,
                    feedback_reason,
                    missing,
                    log,
                    session_id,
                )?;
            }
            LoopAction::RetryWithHint => {
                missing.push(format!("avoid repeating prior attempts: {}", signal.reason));
                self.apply_continuation(
                    current,
                    iteration,
                    max_iterations,
                    feedback_reason,
                    missing,
                    log,
                    session_id,
                )?;
            }
        }

        Ok(())
    }

    /// `Running -> NeedsContinuation`. No further transition to `Ready` is
    /// performed: `Scheduler::ready_tasks` already treats `NeedsContinuation`
    /// as directly claimable.
    fn apply_continuation(
        &self,
        current: &Task,
        iteration: u32,
        max_iterations: u32,
        reason: String,
        missing: Vec<String>,
        log: &SessionLog,
        session_id: &str,
    ) -> anyhow::Result<()> {
        let updated = self.task_store.update_cas(&current.id, current.version, |t| {
            t.state = TaskState::NeedsContinuation;
            t.owner = None;
            t.judgement_feedback = Some(JudgementFeedback {
                iteration,
                max_iterations,
                last_reason: reason.clone(),
                missing_requirements: missing.clone(),
            });
            Ok(())
        })?;
        self.log_task_updated(log, session_id, &updated)?;
        Ok(())
    }

    async fn apply_escalation_outcome(
        &self,
        current: &Task,
        outcome: EscalationOutcome,
        log: &SessionLog,
        session_id: &str,
    ) -> anyhow::Result<()> {
        match outcome {
            EscalationOutcome::AwaitingUser => {
                let updated = self.task_store.update_cas(&current.id, current.version, |t| {
                    t.state = TaskState::Blocked;
                    t.owner = None;
                    t.block_message = Some(AWAITING_USER_BLOCK_MESSAGE.to_string());
                    Ok(())
                })?;
                self.log_task_updated(log, session_id, &updated)?;
            }
            EscalationOutcome::Replan { .. } => {
                let verdict = JudgeVerdict {
                    success: false,
                    should_continue: false,
                    should_replan: true,
                    already_satisfied: false,
                    reason: "escalated to planner for replanning".to_string(),
                    missing_requirements: Vec::new(),
                };
                self.replan_task(current, "(escalated without a fresh run log)", &verdict, log, session_id)
                    .await?;
            }
            EscalationOutcome::Resolved { recommendation } => {
                let iteration = current.judgement_feedback.as_ref().map(|f| f.iteration).unwrap_or(0);
                let max_iterations = self.config.loop_detection.max_step_iterations.worker;
                self.apply_continuation(
                    current,
                    iteration,
                    max_iterations,
                    recommendation,
                    Vec::new(),
                    log,
                    session_id,
                )?;
            }
        }
        Ok(())
    }

    async fn replan_task(
        &self,
        current: &Task,
        run_log: &str,
        verdict: &JudgeVerdict,
        log: &SessionLog,
        session_id: &str,
    ) -> anyhow::Result<()> {
        let planning_config = self.planning_config();
        let harness = self.config.agents.planner.kind.harness_name();
        let model = non_empty(&self.config.agents.planner.model);

        let replacements = self
            .planner
            .replan(current, run_log, verdict, &self.repo_path, &planning_config, harness, model)
            .await?;

        let replacement_ids: Vec<String> = replacements.iter().map(|t| t.id.clone()).collect();
        for task in &replacements {
            self.task_store.create(task)?;
            log.log(&SessionLogRecord::TaskCreated {
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                task_id: task.id.clone(),
            })?;
        }

        let updated = self.task_store.update_cas(&current.id, current.version, |t| {
            t.state = TaskState::ReplacedByReplan;
            t.owner = None;
            t.replanning_info = Some(ReplanningInfo {
                replan_reason: verdict.reason.clone(),
                replacement_task_ids: replacement_ids.clone(),
            });
            Ok(())
        })?;
        self.log_task_updated(log, session_id, &updated)?;
        Ok(())
    }

    fn log_task_updated(&self, log: &SessionLog, session_id: &str, task: &Task) -> anyhow::Result<()> {
        log.log(&SessionLogRecord::TaskUpdated {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            task_id: task.id.clone(),
            state: task.state.to_string(),
            version: task.version,
        })?;
        Ok(())
    }

    /// Wait up to 10 seconds for `in_flight` worker/judge attempts to
    /// report back, so their Run/Check records finish writing before the
    /// session is marked cancelled.
    async fn drain_in_flight(&self, rx: &mut mpsc::Receiver<TaskCompletion>, mut in_flight: usize) {
        if in_flight == 0 {
            return;
        }
        tracing::info!(in_flight, "session cancelled, draining in-flight tasks");
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        while in_flight > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(_)) => in_flight -= 1,
                _ => break,
            }
        }
        if in_flight > 0 {
            tracing::warn!(remaining = in_flight, "drain timeout expired, tasks still in flight");
        }
    }

    /// Mark every non-terminal task of `root_session_id` CANCELLED and
    /// return the terminal outcome for an externally-interrupted session.
    fn cancel_session(
        &self,
        log: &SessionLog,
        session_id: &str,
        root_session_id: &str,
    ) -> anyhow::Result<SessionOutcome> {
        let tasks = self.task_store.list()?;
        for task in tasks
            .into_iter()
            .filter(|t| t.root_session_id == root_session_id && !t.state.is_terminal())
        {
            let version = task.version;
            let updated = self.task_store.update_cas(&task.id, version, |t| {
                t.owner = None;
                t.state = TaskState::Cancelled;
                Ok(())
            })?;
            self.log_task_updated(log, session_id, &updated)?;
        }
        Ok(SessionOutcome::Cancelled {
            session_id: session_id.to_string(),
        })
    }

    // -- Accessors for CLI subcommands that inspect state without running a
    //    session (`status`, `resolve`, `log`, `report`). --

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo_path(&self) -> &std::path::Path {
        &self.repo_path
    }

    pub fn task_store(&self) -> &TaskStore {
        &self.task_store
    }

    pub fn sessions_root(&self) -> &std::path::Path {
        &self.sessions_root
    }

    pub fn pointer_manager(&self) -> &SessionPointerManager {
        &self.pointer_manager
    }

    pub fn vcs(&self) -> &Arc<dyn VcsDriver> {
        &self.vcs
    }

    pub fn harnesses(&self) -> &Arc<HarnessRegistry> {
        &self.harnesses
    }

    /// Generate every Markdown report for a completed or in-flight session.
    pub fn generate_report(&self, session_id: &str, instruction: &str) -> anyhow::Result<()> {
        self.report_generator.generate(session_id, instruction, &self.sessions_root)
    }
}
