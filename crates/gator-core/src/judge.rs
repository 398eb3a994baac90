//! `Judge`: asks an LLM agent to weigh a task's run log against its
//! acceptance criteria and parses a structured verdict.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_harness::{run_to_completion, AgentEvent, HarnessRegistry, MaterializedTask};
use crate::check::Check;
use crate::error::AgentError;
use crate::task::Task;

/// How a failing [`Check`] interacts with the Judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckFailureMode {
    /// A failing check short-circuits straight to BLOCKED; the Judge LLM is
    /// never invoked.
    Block,
    /// A failing check is folded into the Judge's prompt as context but
    /// does not by itself block.
    Warn,
}

/// Parsed verdict JSON returned by the Judge LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub success: bool,
    pub should_continue: bool,
    pub should_replan: bool,
    pub already_satisfied: bool,
    pub reason: String,
    #[serde(default)]
    pub missing_requirements: Vec<String>,
}

/// What the caller (OrchestratorLoop's execution phase) should do with a
/// task given its [`JudgeVerdict`].
#[derive(Debug, Clone, PartialEq)]
pub enum VerdictAction {
    Complete,
    Continue { feedback_reason: String, missing: Vec<String> },
    Replan { reason: String },
    Block { reason: String },
}

impl JudgeVerdict {
    /// Verdict-application rules, applied in priority order.
    pub fn action(&self) -> VerdictAction {
        if self.success && !self.should_continue {
            return VerdictAction::Complete;
        }
        if self.should_replan {
            return VerdictAction::Replan {
                reason: self.reason.clone(),
            };
        }
        if self.should_continue {
            return VerdictAction::Continue {
                feedback_reason: self.reason.clone(),
                missing: self.missing_requirements.clone(),
            };
        }
        VerdictAction::Block {
            reason: self.reason.clone(),
        }
    }
}

/// Strip a ` ```json ... ``` ` fence, if present, and parse the remainder as
/// a [`JudgeVerdict`]. Accepts bare JSON too.
pub fn parse_verdict(text: &str) -> Result<JudgeVerdict, AgentError> {
    let candidate = extract_json_block(text);
    serde_json::from_str(&candidate)
        .map_err(|e| AgentError::ParseFailure(format!("invalid judge verdict JSON: {e}")))
}

pub(crate) fn extract_json_block(text: &str) -> String {
    if let Some(start) = text.find("```json") {
        let after = &text[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    text.trim().to_string()
}

fn looks_rate_limited(events: &[AgentEvent]) -> Option<Option<Duration>> {
    for event in events {
        if let AgentEvent::Error { message } = event {
            if message.contains("429") || message.to_lowercase().contains("rate limit") {
                return Some(parse_retry_after(message));
            }
        }
    }
    None
}

fn parse_retry_after(message: &str) -> Option<Duration> {
    let marker = "retry-after=";
    let lower = message.to_lowercase();
    let idx = lower.find(marker)?;
    let rest = &message[idx + marker.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().ok().map(Duration::from_secs)
}

pub struct Judge {
    harnesses: Arc<HarnessRegistry>,
    judge_task_retries: u32,
}

impl Judge {
    pub fn new(harnesses: Arc<HarnessRegistry>, judge_task_retries: u32) -> Self {
        Self {
            harnesses,
            judge_task_retries,
        }
    }

    /// Evaluate `task` given `run_log` and any [`Check`] results. Returns
    /// `Ok(None)` if `failure_mode == Block` and a check failed -- the
    /// caller should go straight to `Scheduler::block` without a verdict.
    pub async fn evaluate(
        &self,
        task: &Task,
        run_log: &str,
        checks: &[Check],
        failure_mode: Option<CheckFailureMode>,
        harness_name: &str,
        model: Option<String>,
    ) -> Result<Option<JudgeVerdict>, AgentError> {
        let failing: Vec<&Check> = checks.iter().filter(|c| !c.passed).collect();

        if matches!(failure_mode, Some(CheckFailureMode::Block)) && !failing.is_empty() {
            return Ok(None);
        }

        let prompt = build_prompt(task, run_log, &failing, failure_mode);

        let harness = self
            .harnesses
            .get(harness_name)
            .ok_or_else(|| AgentError::Other(anyhow::anyhow!("unknown harness: {harness_name}")))?;

        let mut attempt = 0;
        loop {
            let materialized = MaterializedTask {
                task_id: Uuid::new_v4(),
                name: format!("{}-judge", task.id),
                prompt: prompt.clone(),
                working_dir: std::env::temp_dir(),
                env_vars: HashMap::new(),
                model: model.clone(),
            };

            let outcome = run_to_completion(harness.as_ref(), &materialized).await;

            match outcome {
                Ok(outcome) => {
                    if let Some(retry_after) = looks_rate_limited(&outcome.events) {
                        if attempt >= self.judge_task_retries {
                            return Err(AgentError::RateLimited { retry_after });
                        }
                        attempt += 1;
                        tokio::time::sleep(retry_after.unwrap_or(Duration::from_secs(1))).await;
                        continue;
                    }
                    return parse_verdict(&outcome.final_response).map(Some);
                }
                Err(e) => return Err(AgentError::Other(e)),
            }
        }
    }
}

fn build_prompt(
    task: &Task,
    run_log: &str,
    failing_checks: &[&Check],
    failure_mode: Option<CheckFailureMode>,
) -> String {
    let mut prompt = format!(
        "Acceptance criteria:\n{}\n\nRun log:\n{}\n",
        task.acceptance, run_log
    );

    if matches!(failure_mode, Some(CheckFailureMode::Warn)) && !failing_checks.is_empty() {
        prompt.push_str("\nThe following checks failed (informational, does not by itself block):\n");
        for check in failing_checks {
            prompt.push_str(&format!(
                "- `{}` exited {}\n{}\n",
                check.commands.join(" "),
                check.exit_code,
                check.stderr
            ));
        }
    }

    prompt.push_str(
        "\nRespond with a JSON object: {\"success\": bool, \"shouldContinue\": bool, \
         \"shouldReplan\": bool, \"alreadySatisfied\": bool, \"reason\": string, \
         \"missingRequirements\": [string]}\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let text = r#"{"success":true,"shouldContinue":false,"shouldReplan":false,"alreadySatisfied":false,"reason":"looks good","missingRequirements":[]}"#;
        let verdict = parse_verdict(text).unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.action(), VerdictAction::Complete);
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Here is my verdict:\n```json\n{\"success\":false,\"shouldContinue\":true,\"shouldReplan\":false,\"alreadySatisfied\":false,\"reason\":\"missing tests\",\"missingRequirements\":[\"tests\"]}\n```\n";
        let verdict = parse_verdict(text).unwrap();
        assert!(!verdict.success);
        assert_eq!(
            verdict.action(),
            VerdictAction::Continue {
                feedback_reason: "missing tests".into(),
                missing: vec!["tests".into()]
            }
        );
    }

    #[test]
    fn malformed_json_is_parse_failure() {
        let err = parse_verdict("not json at all").unwrap_err();
        assert!(matches!(err, AgentError::ParseFailure(_)));
    }

    #[test]
    fn replan_takes_priority_over_continue() {
        let verdict = JudgeVerdict {
            success: false,
            should_continue: true,
            should_replan: true,
            already_satisfied: false,
            reason: "scope too large".into(),
            missing_requirements: vec![],
        };
        assert_eq!(
            verdict.action(),
            VerdictAction::Replan {
                reason: "scope too large".into()
            }
        );
    }

    #[test]
    fn neither_continue_nor_replan_blocks() {
        let verdict = JudgeVerdict {
            success: false,
            should_continue: false,
            should_replan: false,
            already_satisfied: false,
            reason: "unrecoverable".into(),
            missing_requirements: vec![],
        };
        assert_eq!(
            verdict.action(),
            VerdictAction::Block {
                reason: "unrecoverable".into()
            }
        );
    }

    #[test]
    fn retry_after_parsed_from_message() {
        let duration = parse_retry_after("429 rate limited, retry-after=30 seconds");
        assert_eq!(duration, Some(Duration::from_secs(30)));
    }
}
