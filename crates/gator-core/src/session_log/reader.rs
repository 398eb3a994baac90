//! Streaming reader over a session's NDJSON log, plus the aggregation
//! helpers that back `ReportGenerator` and session resume.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use super::SessionLogRecord;
use crate::error::SessionLogError;

/// Lazily parses a `.jsonl` file line by line. Unparsable lines are logged
/// and skipped rather than aborting the read.
pub struct SessionLogReader {
    path: PathBuf,
}

impl SessionLogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse every well-formed line into a [`SessionLogRecord`], in file
    /// order.
    pub fn read_all(&self) -> Result<Vec<SessionLogRecord>, SessionLogError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionLogError::NotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(SessionLogError::Io(e)),
        };
        let reader = std::io::BufReader::new(file);

        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(SessionLogError::Io)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionLogRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unparsable session log line"
                    );
                }
            }
        }
        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One phase's start/complete boundary, if both were observed.
#[derive(Debug, Clone)]
pub struct PhaseBoundary {
    pub phase: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Reconstructed resume context: enough to continue a session without
/// replaying the whole `TaskStore`.
#[derive(Debug, Clone, Default)]
pub struct ResumeContext {
    pub completed_task_count: usize,
    pub pending_task_count: usize,
    pub per_task_last_verdict: HashMap<String, JudgeVerdictSummary>,
}

#[derive(Debug, Clone)]
pub struct JudgeVerdictSummary {
    pub success: bool,
    pub should_continue: bool,
    pub should_replan: bool,
    pub reason: String,
}

/// Phase start/complete pairs, in the order phases were entered.
pub fn phase_boundaries(records: &[SessionLogRecord]) -> Vec<PhaseBoundary> {
    let mut boundaries: Vec<PhaseBoundary> = Vec::new();
    for record in records {
        match record {
            SessionLogRecord::PhaseStart { phase, timestamp, .. } => {
                boundaries.push(PhaseBoundary {
                    phase: phase.clone(),
                    started_at: *timestamp,
                    completed_at: None,
                });
            }
            SessionLogRecord::PhaseComplete { phase, timestamp, .. } => {
                if let Some(open) = boundaries
                    .iter_mut()
                    .rev()
                    .find(|b| b.phase == *phase && b.completed_at.is_none())
                {
                    open.completed_at = Some(*timestamp);
                }
            }
            _ => {}
        }
    }
    boundaries
}

/// Every record that names `task_id`, in file order.
pub fn task_events<'a>(
    records: &'a [SessionLogRecord],
    task_id: &str,
) -> Vec<&'a SessionLogRecord> {
    records
        .iter()
        .filter(|r| record_task_id(r) == Some(task_id))
        .collect()
}

fn record_task_id(record: &SessionLogRecord) -> Option<&str> {
    match record {
        SessionLogRecord::TaskCreated { task_id, .. }
        | SessionLogRecord::TaskUpdated { task_id, .. }
        | SessionLogRecord::WorkerStart { task_id, .. }
        | SessionLogRecord::WorkerComplete { task_id, .. }
        | SessionLogRecord::JudgeStart { task_id, .. }
        | SessionLogRecord::JudgeComplete { task_id, .. } => Some(task_id),
        _ => None,
    }
}

/// Count of `WorkerStart` events observed per task id (the iteration
/// count: continuations re-invoke the Worker on the same task).
pub fn worker_iteration_counts(records: &[SessionLogRecord]) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for record in records {
        if let SessionLogRecord::WorkerStart { task_id, .. } = record {
            *counts.entry(task_id.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// The most recent `JudgeComplete` verdict observed per task id.
pub fn terminal_verdict_per_task(
    records: &[SessionLogRecord],
) -> HashMap<String, JudgeVerdictSummary> {
    let mut verdicts = HashMap::new();
    for record in records {
        if let SessionLogRecord::JudgeComplete {
            task_id,
            success,
            should_continue,
            should_replan,
            reason,
            ..
        } = record
        {
            verdicts.insert(
                task_id.clone(),
                JudgeVerdictSummary {
                    success: *success,
                    should_continue: *should_continue,
                    should_replan: *should_replan,
                    reason: reason.clone(),
                },
            );
        }
    }
    verdicts
}

/// Reconstruct [`ResumeContext`] by replaying `TaskUpdated` events to their
/// last-known state per task, without touching the `TaskStore`.
pub fn extract_resume_context(records: &[SessionLogRecord]) -> ResumeContext {
    let mut last_state: HashMap<String, String> = HashMap::new();
    for record in records {
        if let SessionLogRecord::TaskUpdated { task_id, state, .. } = record {
            last_state.insert(task_id.clone(), state.clone());
        }
    }

    let completed_task_count = last_state
        .values()
        .filter(|s| {
            matches!(
                s.as_str(),
                "DONE" | "BLOCKED" | "CANCELLED" | "SKIPPED" | "REPLACED_BY_REPLAN"
            )
        })
        .count();
    let pending_task_count = last_state.len() - completed_task_count;

    ResumeContext {
        completed_task_count,
        pending_task_count,
        per_task_last_verdict: terminal_verdict_per_task(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_log::SessionLog;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn resume_context_counts_terminal_vs_pending() {
        let dir = TempDir::new().unwrap();
        let log = SessionLog::new(dir.path(), "s1");
        log.log(&SessionLogRecord::TaskUpdated {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            task_id: "t1".into(),
            state: "DONE".into(),
            version: 2,
        })
        .unwrap();
        log.log(&SessionLogRecord::TaskUpdated {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            task_id: "t2".into(),
            state: "READY".into(),
            version: 0,
        })
        .unwrap();

        let reader = SessionLogReader::new(log.path());
        let records = reader.read_all().unwrap();
        let ctx = extract_resume_context(&records);
        assert_eq!(ctx.completed_task_count, 1);
        assert_eq!(ctx.pending_task_count, 1);
    }

    #[test]
    fn unparsable_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.jsonl");
        std::fs::write(&path, "not json\n{\"type\":\"bogus_type\"}\n").unwrap();
        let reader = SessionLogReader::new(&path);
        let records = reader.read_all().unwrap();
        assert!(records.is_empty());
    }
}
