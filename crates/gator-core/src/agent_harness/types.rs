//! Shared types for the agent harness layer.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::process::ChildStdin;
use uuid::Uuid;

/// A task materialized into everything a harness needs to spawn an agent:
/// the assembled prompt, the working directory (a worktree), and any
/// environment variables the agent process should inherit.
#[derive(Debug)]
pub struct MaterializedTask {
    /// The task this invocation is for.
    pub task_id: Uuid,
    /// Short human-readable name, used in process titles and logs.
    pub name: String,
    /// The fully assembled prompt text handed to the agent.
    pub prompt: String,
    /// Working directory the agent process should run in (a worktree path).
    pub working_dir: PathBuf,
    /// Extra environment variables to inject into the child process.
    pub env_vars: HashMap<String, String>,
    /// Model identifier to request, if the harness supports selecting one.
    pub model: Option<String>,
}

/// A handle to a spawned agent process.
#[derive(Debug)]
pub struct AgentHandle {
    /// OS process id.
    pub pid: u32,
    /// Piped stdin, if the harness supports sending follow-up messages.
    pub stdin: Option<ChildStdin>,
    /// Task this handle belongs to.
    pub task_id: Uuid,
    /// Attempt number (bumped on each continuation).
    pub attempt: u32,
    /// Name of the harness that spawned this handle.
    pub harness_name: String,
}

/// An event emitted by a running agent, parsed from its output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A text message from the agent (assistant turn or final result).
    Message { role: String, content: String },
    /// The agent invoked a tool.
    ToolCall { tool: String, input: Value },
    /// A tool call returned a result.
    ToolResult { tool: String, output: Value },
    /// Cumulative token usage reported by the agent.
    TokenUsage { input_tokens: u64, output_tokens: u64 },
    /// An error surfaced by the agent or its harness.
    Error { message: String },
    /// The agent process has exited and no further events will follow.
    Completed,
}

impl AgentEvent {
    /// Concatenate every `Message` event's content, in order, with newlines.
    ///
    /// Used by [`crate::agent::collect_final_response`] to derive the text an
    /// agent ultimately produced, from a fully-drained event stream.
    pub fn join_messages(events: &[AgentEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::Message { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
