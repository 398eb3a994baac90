//! The [`Check`] record: a deterministic CI/lint/test result, distinct from
//! the Judge's LLM-based verdict.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub id: String,
    pub task_id: String,
    pub commands: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub passed: bool,
}

impl Check {
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        commands: Vec<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            commands,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            passed: exit_code == 0,
        }
    }
}
