//! Codex CLI harness adapter.
//!
//! Spawns `codex exec --json` as a subprocess and parses its JSONL output
//! into [`AgentEvent`] variants. Structurally this mirrors
//! [`super::claude_code::ClaudeCodeAdapter`] -- same process-table
//! bookkeeping, same SIGTERM-then-SIGKILL shutdown -- because both harnesses
//! satisfy the same child-process contract; only the wire format and CLI
//! flags differ.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::trait_def::Harness;
use super::types::{AgentEvent, AgentHandle, MaterializedTask};

struct ProcessState {
    child: Child,
    stdout: Option<ChildStdout>,
}

/// Harness adapter for the Codex CLI (`codex exec --json`).
#[derive(Clone)]
pub struct CodexAdapter {
    codex_binary_path: String,
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
}

impl std::fmt::Debug for CodexAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodexAdapter")
            .field("codex_binary_path", &self.codex_binary_path)
            .finish()
    }
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self {
            codex_binary_path: "codex".to_string(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            codex_binary_path: path.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a single JSONL line from `codex exec --json` output.
///
/// Codex's event stream uses `msg.type` for the event discriminant, nested
/// one level deeper than Claude Code's top-level `type`.
fn parse_codex_line(line: &str) -> Result<Vec<AgentEvent>> {
    let v: serde_json::Value =
        serde_json::from_str(line).context("malformed JSON in codex output")?;

    let msg = v.get("msg").unwrap_or(&v);
    let event_type = msg.get("type").and_then(|t| t.as_str()).unwrap_or("");

    let mut events = Vec::new();
    match event_type {
        "agent_message" => {
            if let Some(text) = msg.get("message").and_then(|m| m.as_str()) {
                events.push(AgentEvent::Message {
                    role: "assistant".to_string(),
                    content: text.to_string(),
                });
            }
        }
        "exec_command_begin" => {
            let command = msg
                .get("command")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            events.push(AgentEvent::ToolCall {
                tool: "exec".to_string(),
                input: command,
            });
        }
        "exec_command_end" => {
            let output = msg
                .get("stdout")
                .or_else(|| msg.get("output"))
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            events.push(AgentEvent::ToolResult {
                tool: "exec".to_string(),
                output,
            });
        }
        "token_count" => {
            let input_tokens = msg.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
            let output_tokens = msg.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
            if input_tokens > 0 || output_tokens > 0 {
                events.push(AgentEvent::TokenUsage {
                    input_tokens,
                    output_tokens,
                });
            }
        }
        "error" => {
            let message = msg
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            events.push(AgentEvent::Error { message });
        }
        other => {
            debug!(event_type = other, "ignoring unrecognised codex event type");
        }
    }

    Ok(events)
}

#[async_trait]
impl Harness for CodexAdapter {
    fn name(&self) -> &str {
        "codex"
    }

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle> {
        let mut cmd = Command::new(&self.codex_binary_path);
        cmd.arg("exec").arg("--json").arg(&task.prompt);

        if let Some(model) = &task.model {
            cmd.arg("--model").arg(model);
        }

        cmd.current_dir(&task.working_dir);
        for (key, value) in &task.env_vars {
            cmd.env(key, value);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::null());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn codex binary at '{}' -- is it installed and on PATH?",
                self.codex_binary_path
            )
        })?;

        let pid = child.id().context("child process has no pid")?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        {
            let mut processes = self.processes.lock().await;
            processes.insert(pid, ProcessState { child, stdout });
        }

        Ok(AgentHandle {
            pid,
            stdin,
            task_id: task.task_id,
            attempt: 0,
            harness_name: self.name().to_string(),
        })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let pid = handle.pid;
        let processes = Arc::clone(&self.processes);

        let stream = async_stream::stream! {
            let stdout = {
                let mut procs = processes.lock().await;
                procs.get_mut(&pid).and_then(|state| state.stdout.take())
            };

            let Some(stdout) = stdout else {
                warn!(pid, "no stdout available for pid -- events already consumed or process missing");
                yield AgentEvent::Error {
                    message: "stdout not available (already consumed or process not found)".to_string(),
                };
                yield AgentEvent::Completed;
                return;
            };

            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match parse_codex_line(trimmed) {
                            Ok(events) => {
                                for event in events {
                                    yield event;
                                }
                            }
                            Err(e) => {
                                warn!(line = trimmed, error = %e, "skipping malformed codex JSONL line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading codex stdout");
                        yield AgentEvent::Error {
                            message: format!("stdout read error: {e}"),
                        };
                        break;
                    }
                }
            }

            yield AgentEvent::Completed;
        };

        Box::pin(stream)
    }

    async fn send(&self, _handle: &AgentHandle, _message: &str) -> Result<()> {
        bail!("send() is not supported for CodexAdapter -- codex exec is single-shot")
    }

    async fn kill(&self, handle: &AgentHandle) -> Result<()> {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            #[cfg(unix)]
            {
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }

            let exited =
                tokio::time::timeout(std::time::Duration::from_secs(5), state.child.wait()).await;

            match exited {
                Ok(Ok(_status)) => debug!(pid, "process exited after SIGTERM"),
                _ => {
                    debug!(pid, "process did not exit after SIGTERM, sending SIGKILL");
                    let _ = state.child.kill().await;
                }
            }

            processes.remove(&pid);
        }

        Ok(())
    }

    async fn is_running(&self, handle: &AgentHandle) -> bool {
        let pid = handle.pid;
        let mut processes = self.processes.lock().await;

        if let Some(state) = processes.get_mut(&pid) {
            match state.child.try_wait() {
                Ok(Some(_status)) => {
                    processes.remove(&pid);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!(pid, error = %e, "error checking process status");
                    false
                }
            }
        } else {
            false
        }
    }
}
