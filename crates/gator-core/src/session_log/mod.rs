//! Per-session append-only NDJSON event log, and the pointer files that
//! make resume discovery possible.

pub mod pointer;
pub mod reader;

pub use pointer::{SessionPointer, SessionPointerManager};
pub use reader::SessionLogReader;

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionLogError;

/// Discriminated record written to a session's `.jsonl` file. Unknown tags
/// on read are a parse failure, not silently coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionLogRecord {
    SessionStart {
        timestamp: DateTime<Utc>,
        session_id: String,
        root_session_id: String,
        instruction: String,
        base_branch: String,
    },
    SessionComplete {
        timestamp: DateTime<Utc>,
        session_id: String,
        outcome: String,
    },
    SessionAbort {
        timestamp: DateTime<Utc>,
        session_id: String,
        reason: String,
    },
    PhaseStart {
        timestamp: DateTime<Utc>,
        session_id: String,
        phase: String,
    },
    PhaseComplete {
        timestamp: DateTime<Utc>,
        session_id: String,
        phase: String,
    },
    TaskCreated {
        timestamp: DateTime<Utc>,
        session_id: String,
        task_id: String,
    },
    TaskUpdated {
        timestamp: DateTime<Utc>,
        session_id: String,
        task_id: String,
        state: String,
        version: u64,
    },
    WorkerStart {
        timestamp: DateTime<Utc>,
        session_id: String,
        task_id: String,
        worker_id: String,
        run_id: String,
        iteration: u32,
    },
    WorkerComplete {
        timestamp: DateTime<Utc>,
        session_id: String,
        task_id: String,
        worker_id: String,
        run_id: String,
        success: bool,
        error: Option<String>,
    },
    JudgeStart {
        timestamp: DateTime<Utc>,
        session_id: String,
        task_id: String,
        run_id: String,
    },
    JudgeComplete {
        timestamp: DateTime<Utc>,
        session_id: String,
        task_id: String,
        run_id: String,
        success: bool,
        should_continue: bool,
        should_replan: bool,
        reason: String,
    },
    LeaderDecision {
        timestamp: DateTime<Utc>,
        session_id: String,
        reason: String,
        action: String,
    },
    Error {
        timestamp: DateTime<Utc>,
        session_id: String,
        context: String,
        message: String,
    },
}

impl SessionLogRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionLogRecord::SessionStart { timestamp, .. }
            | SessionLogRecord::SessionComplete { timestamp, .. }
            | SessionLogRecord::SessionAbort { timestamp, .. }
            | SessionLogRecord::PhaseStart { timestamp, .. }
            | SessionLogRecord::PhaseComplete { timestamp, .. }
            | SessionLogRecord::TaskCreated { timestamp, .. }
            | SessionLogRecord::TaskUpdated { timestamp, .. }
            | SessionLogRecord::WorkerStart { timestamp, .. }
            | SessionLogRecord::WorkerComplete { timestamp, .. }
            | SessionLogRecord::JudgeStart { timestamp, .. }
            | SessionLogRecord::JudgeComplete { timestamp, .. }
            | SessionLogRecord::LeaderDecision { timestamp, .. }
            | SessionLogRecord::Error { timestamp, .. } => *timestamp,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SessionLogRecord::SessionStart { session_id, .. }
            | SessionLogRecord::SessionComplete { session_id, .. }
            | SessionLogRecord::SessionAbort { session_id, .. }
            | SessionLogRecord::PhaseStart { session_id, .. }
            | SessionLogRecord::PhaseComplete { session_id, .. }
            | SessionLogRecord::TaskCreated { session_id, .. }
            | SessionLogRecord::TaskUpdated { session_id, .. }
            | SessionLogRecord::WorkerStart { session_id, .. }
            | SessionLogRecord::WorkerComplete { session_id, .. }
            | SessionLogRecord::JudgeStart { session_id, .. }
            | SessionLogRecord::JudgeComplete { session_id, .. }
            | SessionLogRecord::LeaderDecision { session_id, .. }
            | SessionLogRecord::Error { session_id, .. } => session_id,
        }
    }
}

/// Append-only writer for one session's `.jsonl` file.
#[derive(Debug, Clone)]
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(sessions_root: impl Into<PathBuf>, session_id: &str) -> Self {
        let root: PathBuf = sessions_root.into();
        Self {
            path: root.join(format!("{session_id}.jsonl")),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Serialize `record` and append it as a single line.
    ///
    /// A single `write_all` of a line-sized buffer to an `O_APPEND` file is
    /// atomic with respect to other appenders on POSIX filesystems, so no
    /// additional locking is needed here (unlike `TaskStore`, where
    /// read-modify-write requires the directory-lock CAS).
    pub fn log(&self, record: &SessionLogRecord) -> Result<(), SessionLogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(SessionLogError::Io)?;
        }
        let mut line = serde_json::to_string(record).map_err(|e| {
            SessionLogError::WriteError(std::io::Error::other(e.to_string()))
        })?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SessionLogError::Io)?;
        file.write_all(line.as_bytes())
            .map_err(SessionLogError::WriteError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_appends_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path(), "s1");
        log.log(&SessionLogRecord::SessionStart {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            root_session_id: "s1".into(),
            instruction: "do the thing".into(),
            base_branch: "main".into(),
        })
        .unwrap();
        log.log(&SessionLogRecord::PhaseStart {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            phase: "planning".into(),
        })
        .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
