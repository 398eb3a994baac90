//! Error taxonomy shared across the orchestration engine.
//!
//! Every fallible operation at or below a component boundary returns one of
//! these `thiserror`-derived enums; nothing in library code uses panics or
//! exceptions for expected failure modes.

use thiserror::Error;

/// Errors returned by [`crate::store::TaskStore`] and its sibling
/// run/check stores.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("no record found for id {0}")]
    NotFound(String),

    #[error("record already exists for id {0}")]
    AlreadyExists(String),

    #[error("lock already held for id {0}")]
    LockHeld(String),

    #[error("concurrent modification: expected version {expected}, found {actual}")]
    ConcurrentModification { expected: u64, actual: u64 },

    #[error("record for id {id} failed to parse: {reason}")]
    SchemaInvalid { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by [`crate::session_log`] writers/readers/pointer manager.
#[derive(Debug, Error)]
pub enum SessionLogError {
    #[error("failed to write session log record: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("failed to resume session {session_id}: {reason}")]
    SessionResumeError { session_id: String, reason: String },

    #[error("no pointer found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by [`crate::agent_harness`] implementations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent invocation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<std::time::Duration> },

    #[error("agent process exited with status {0}")]
    ProcessExit(i32),

    #[error("failed to parse agent output: {0}")]
    ParseFailure(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Policy-level failures: limits and safety nets tripped by the
/// orchestrator rather than by any single component.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("escalation limit reached for target {target} (limit {limit})")]
    EscalationLimitReached { target: String, limit: u32 },

    #[error("loop detected: {reason}")]
    LoopDetected { reason: String },

    #[error("iteration budget exceeded: {iterations} >= {max}")]
    IterationBudgetExceeded { iterations: u32, max: u32 },
}

/// Errors from [`crate::config`] loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),

    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
