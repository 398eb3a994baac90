//! The central [`Task`] record and its associated enums.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task's position in its lifecycle.
///
/// `Done`, `Blocked`, `Cancelled`, `Skipped`, and `ReplacedByReplan` are
/// terminal: a [`crate::store::TaskStore::update_cas`] caller must never
/// transition a task out of one of these (enforced by
/// [`TaskState::is_terminal`] checks in the Scheduler/Judge/Integrator, not
/// by the type itself, since the store is generic over the update
/// function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Ready,
    Running,
    NeedsContinuation,
    Done,
    Blocked,
    Cancelled,
    Skipped,
    ReplacedByReplan,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Done
                | TaskState::Blocked
                | TaskState::Cancelled
                | TaskState::Skipped
                | TaskState::ReplacedByReplan
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::NeedsContinuation => "NEEDS_CONTINUATION",
            TaskState::Done => "DONE",
            TaskState::Blocked => "BLOCKED",
            TaskState::Cancelled => "CANCELLED",
            TaskState::Skipped => "SKIPPED",
            TaskState::ReplacedByReplan => "REPLACED_BY_REPLAN",
        };
        f.write_str(s)
    }
}

/// The kind of work a task represents, set by the Planner/Replanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implementation,
    Documentation,
    Investigation,
    Integration,
}

/// Judge verdict history folded back into a continuation task's prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgementFeedback {
    pub iteration: u32,
    pub max_iterations: u32,
    pub last_reason: String,
    pub missing_requirements: Vec<String>,
}

/// Set on a task once it has been superseded by a Replanner decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanningInfo {
    pub replan_reason: String,
    pub replacement_task_ids: Vec<String>,
}

/// Set on a task blocked by a merge conflict, pointing at the synthetic
/// conflict-resolution task created to fix it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConflictResolution {
    pub conflict_task_id: String,
    pub temp_branch: String,
}

/// One planned unit of work.
///
/// The `version` field is the CAS token: [`crate::store::TaskStore::update_cas`]
/// is the only sanctioned way to mutate a persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub version: u64,
    pub state: TaskState,
    /// Worker id; non-null iff `state == Running`.
    pub owner: Option<String>,

    pub repo: String,
    pub branch: String,
    pub base_branch: String,
    pub scope_paths: BTreeSet<String>,

    pub acceptance: String,
    pub context: String,
    pub task_type: TaskType,

    pub dependencies: BTreeSet<String>,

    pub root_session_id: String,
    pub session_id: String,

    pub judgement_feedback: Option<JudgementFeedback>,
    pub replanning_info: Option<ReplanningInfo>,
    pub pending_conflict_resolution: Option<PendingConflictResolution>,

    /// Human-readable reason set whenever `state` becomes `Blocked`.
    pub block_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a new READY task with version 0, stamping both timestamps
    /// to `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        base_branch: impl Into<String>,
        acceptance: impl Into<String>,
        context: impl Into<String>,
        task_type: TaskType,
        dependencies: BTreeSet<String>,
        root_session_id: impl Into<String>,
        session_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            version: 0,
            state: TaskState::Ready,
            owner: None,
            repo: repo.into(),
            branch: branch.into(),
            base_branch: base_branch.into(),
            scope_paths: BTreeSet::new(),
            acceptance: acceptance.into(),
            context: context.into(),
            task_type,
            dependencies,
            root_session_id: root_session_id.into(),
            session_id: session_id.into(),
            judgement_feedback: None,
            replanning_info: None,
            pending_conflict_resolution: None,
            block_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `owner.is_some() <=> state == Running` — checked at every
    /// CAS-guarded transition site, not just asserted here.
    pub fn owner_invariant_holds(&self) -> bool {
        self.owner.is_some() == (self.state == TaskState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_task() -> Task {
        Task::new(
            "t1",
            "repo",
            "feat/t1",
            "main",
            "acceptance",
            "context",
            TaskType::Implementation,
            BTreeSet::new(),
            "s1",
            "s1",
            Utc::now(),
        )
    }

    #[test]
    fn new_task_is_ready_with_version_zero_and_no_owner() {
        let task = mk_task();
        assert_eq!(task.version, 0);
        assert_eq!(task.state, TaskState::Ready);
        assert!(task.owner.is_none());
        assert!(task.owner_invariant_holds());
    }

    #[test]
    fn owner_invariant_violated_when_running_without_owner() {
        let mut task = mk_task();
        task.state = TaskState::Running;
        assert!(!task.owner_invariant_holds());
        task.owner = Some("worker-1".into());
        assert!(task.owner_invariant_holds());
    }

    #[test]
    fn owner_invariant_violated_when_owner_set_but_not_running() {
        let mut task = mk_task();
        task.owner = Some("worker-1".into());
        assert!(!task.owner_invariant_holds());
    }

    #[test]
    fn only_designated_states_are_terminal() {
        let terminal = [
            TaskState::Done,
            TaskState::Blocked,
            TaskState::Cancelled,
            TaskState::Skipped,
            TaskState::ReplacedByReplan,
        ];
        let non_terminal = [TaskState::Ready, TaskState::Running, TaskState::NeedsContinuation];

        for state in terminal {
            assert!(state.is_terminal(), "{state:?} should be terminal");
        }
        for state in non_terminal {
            assert!(!state.is_terminal(), "{state:?} should not be terminal");
        }
    }

    #[test]
    fn state_display_matches_wire_format() {
        assert_eq!(TaskState::NeedsContinuation.to_string(), "NEEDS_CONTINUATION");
        assert_eq!(TaskState::ReplacedByReplan.to_string(), "REPLACED_BY_REPLAN");
    }
}
