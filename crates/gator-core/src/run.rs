//! The [`Run`] record: one invocation of an external agent on a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an agent invocation. Append-only: a `Run` is never rewritten
/// once it reaches a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

/// One record per invocation of [`crate::agent_harness::Harness`] on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub task_id: String,
    pub agent_type: String,
    pub log_path: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Run {
    pub fn started(
        id: impl Into<String>,
        task_id: impl Into<String>,
        agent_type: impl Into<String>,
        log_path: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            log_path: log_path.into(),
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }
}
