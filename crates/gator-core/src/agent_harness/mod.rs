//! Harness adapter interface for LLM coding agents.
//!
//! This module defines the [`Harness`] trait that all agent adapters
//! implement, plus the supporting types ([`AgentHandle`], [`AgentEvent`],
//! [`MaterializedTask`]), the [`HarnessRegistry`] for runtime lookup, and
//! [`run_to_completion`], the one-shot helper used by the Worker, Judge, and
//! Planner alike: spawn, drain every event, return the joined final
//! response text.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     v
//! HarnessRegistry --get("claude-code")--> &dyn Harness
//!     |                                        |
//!     |   spawn(task) -------------------------+
//!     |        |
//!     |        v
//!     |   AgentHandle { pid, stdin, task_id, ... }
//!     |        |
//!     |   events(handle) --> Stream<AgentEvent>
//!     |   send(handle, msg)
//!     |   kill(handle)
//!     |   is_running(handle)
//! ```

pub mod claude_code;
pub mod codex;
pub mod registry;
pub mod trait_def;
pub mod types;

use futures::StreamExt;

// Re-export the primary public API at the module level.
pub use claude_code::ClaudeCodeAdapter;
pub use codex::CodexAdapter;
pub use registry::HarnessRegistry;
pub use trait_def::Harness;
pub use types::{AgentEvent, AgentHandle, MaterializedTask};

/// Outcome of running an agent to completion.
#[derive(Debug, Clone)]
pub struct AgentRunOutcome {
    /// The joined text of every `Message` event the agent emitted.
    pub final_response: String,
    /// Every event observed, in order, for logging to the run's raw log.
    pub events: Vec<AgentEvent>,
}

/// Spawn `task` on `harness`, drain its event stream to completion, and
/// return the joined final response.
///
/// This is the single entry point Worker, Judge, and Planner all use to
/// invoke an agent: they differ only in the prompt they materialize and in
/// how they interpret `final_response`, never in how the subprocess is run.
pub async fn run_to_completion(
    harness: &dyn Harness,
    task: &MaterializedTask,
) -> anyhow::Result<AgentRunOutcome> {
    let handle = harness.spawn(task).await?;
    let events: Vec<AgentEvent> = harness.events(&handle).collect().await;
    let final_response = AgentEvent::join_messages(&events);
    Ok(AgentRunOutcome {
        final_response,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::pin::Pin;
    use uuid::Uuid;

    struct EchoHarness;

    #[async_trait]
    impl Harness for EchoHarness {
        fn name(&self) -> &str {
            "echo"
        }

        async fn spawn(&self, task: &MaterializedTask) -> anyhow::Result<AgentHandle> {
            Ok(AgentHandle {
                pid: 7,
                stdin: None,
                task_id: task.task_id,
                attempt: 0,
                harness_name: "echo".to_string(),
            })
        }

        fn events(&self, _handle: &AgentHandle) -> Pin<Box<dyn futures::Stream<Item = AgentEvent> + Send>> {
            Box::pin(futures::stream::iter(vec![
                AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: "first".to_string(),
                },
                AgentEvent::ToolCall {
                    tool: "bash".to_string(),
                    input: serde_json::json!({"cmd": "ls"}),
                },
                AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: "second".to_string(),
                },
                AgentEvent::Completed,
            ]))
        }

        async fn send(&self, _handle: &AgentHandle, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn kill(&self, _handle: &AgentHandle) -> anyhow::Result<()> {
            Ok(())
        }

        async fn is_running(&self, _handle: &AgentHandle) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn run_to_completion_joins_message_events_only() {
        let harness = EchoHarness;
        let task = MaterializedTask {
            task_id: Uuid::new_v4(),
            name: "t1".to_string(),
            prompt: "do it".to_string(),
            working_dir: PathBuf::from("."),
            env_vars: HashMap::new(),
            model: None,
        };

        let outcome = run_to_completion(&harness, &task).await.unwrap();
        assert_eq!(outcome.final_response, "first\nsecond");
        assert_eq!(outcome.events.len(), 4);
    }
}
