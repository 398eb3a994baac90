//! `EscalationEngine`: routes unresolvable difficulties to one of four
//! targets, each with a per-session attempt cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_harness::{run_to_completion, HarnessRegistry, MaterializedTask};
use crate::config::EscalationLimitsSection;
use crate::error::{AgentError, PolicyError};

/// One of the four escalation destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EscalationTarget {
    User,
    Planner,
    LogicValidator,
    ExternalAdvisor,
}

impl EscalationTarget {
    fn limit(self, limits: &EscalationLimitsSection) -> u32 {
        match self {
            EscalationTarget::User => limits.user,
            EscalationTarget::Planner => limits.planner,
            EscalationTarget::LogicValidator => limits.logic_validator,
            EscalationTarget::ExternalAdvisor => limits.external_advisor,
        }
    }

    fn key(self) -> &'static str {
        match self {
            EscalationTarget::User => "user",
            EscalationTarget::Planner => "planner",
            EscalationTarget::LogicValidator => "logicValidator",
            EscalationTarget::ExternalAdvisor => "externalAdvisor",
        }
    }
}

/// Appended to the session log / escalation history for each attempted
/// escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub target: EscalationTarget,
    pub reason: String,
    pub related_task_id: Option<String>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Parsed response from the LogicValidator's root-cause LLM call.
#[derive(Debug, Clone, Deserialize)]
pub struct LogicValidatorVerdict {
    pub root_cause: String,
    pub recommendation: String,
    pub confidence: f64,
    #[serde(default)]
    pub requires_user_decision: bool,
}

/// What the caller (OrchestratorLoop) should do after an escalation
/// attempt resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// Execution pauses until an external `resolve` operation runs.
    AwaitingUser,
    /// Replanner should be invoked for `related_task_id`.
    Replan { related_task_id: Option<String> },
    /// High-confidence analysis to fold back into the task's context;
    /// execution resumes without further user involvement.
    Resolved { recommendation: String },
}

/// Routes escalations to their target, falling through to `User`
/// transparently once a target's per-session cap is exceeded.
pub struct EscalationEngine {
    harnesses: Arc<HarnessRegistry>,
    limits: EscalationLimitsSection,
    attempts: Mutex<HashMap<&'static str, u32>>,
    records: Mutex<Vec<EscalationRecord>>,
}

impl EscalationEngine {
    pub fn new(harnesses: Arc<HarnessRegistry>, limits: EscalationLimitsSection) -> Self {
        Self {
            harnesses,
            limits,
            attempts: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<EscalationRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Escalate `reason` (about `related_task_id`, if any) to `target`. If
    /// `target`'s attempt cap for this session has already been reached,
    /// falls through to `User` instead -- transparently to the caller.
    pub async fn escalate(
        &self,
        target: EscalationTarget,
        reason: &str,
        related_task_id: Option<&str>,
        harness_name: &str,
        model: Option<String>,
    ) -> Result<EscalationOutcome, AgentError> {
        let effective_target = self.resolve_target(target);

        self.push_record(effective_target, reason, related_task_id);

        let outcome = match effective_target {
            EscalationTarget::User => EscalationOutcome::AwaitingUser,
            EscalationTarget::Planner => EscalationOutcome::Replan {
                related_task_id: related_task_id.map(str::to_string),
            },
            EscalationTarget::LogicValidator => {
                self.invoke_logic_validator(reason, harness_name, model)
                    .await?
            }
            EscalationTarget::ExternalAdvisor => {
                // Reserved for future integration; falls through to User.
                EscalationOutcome::AwaitingUser
            }
        };

        Ok(outcome)
    }

    /// Mark the most recent unresolved record for `target` resolved with
    /// `resolution`, e.g. from the CLI's `resolve` subcommand.
    pub fn resolve(&self, target: EscalationTarget, resolution: &str) -> Result<(), PolicyError> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records
            .iter_mut()
            .rev()
            .find(|r| r.target == target && r.resolved_at.is_none())
        {
            record.resolution = Some(resolution.to_string());
            record.resolved_at = Some(Utc::now());
            Ok(())
        } else {
            Err(PolicyError::EscalationLimitReached {
                target: format!("{target:?}"),
                limit: target.limit(&self.limits),
            })
        }
    }

    /// If `target`'s attempt count has reached its limit, return `User`
    /// instead and do not count this attempt against `target`. Otherwise
    /// bump `target`'s count and return it unchanged.
    fn resolve_target(&self, target: EscalationTarget) -> EscalationTarget {
        if target == EscalationTarget::User {
            return target;
        }

        let limit = target.limit(&self.limits);
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(target.key()).or_insert(0);
        if *count >= limit {
            return EscalationTarget::User;
        }
        *count += 1;
        target
    }

    fn push_record(&self, target: EscalationTarget, reason: &str, related_task_id: Option<&str>) {
        self.records.lock().unwrap().push(EscalationRecord {
            target,
            reason: reason.to_string(),
            related_task_id: related_task_id.map(str::to_string),
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        });
    }

    async fn invoke_logic_validator(
        &self,
        reason: &str,
        harness_name: &str,
        model: Option<String>,
    ) -> Result<EscalationOutcome, AgentError> {
        let harness = self
            .harnesses
            .get(harness_name)
            .ok_or_else(|| AgentError::Other(anyhow::anyhow!("unknown harness: {harness_name}")))?;

        let prompt = format!(
            "A task has stalled and needs root-cause analysis.\n\nReason:\n{reason}\n\n\
             Respond with JSON: {{\"rootCause\": string, \"recommendation\": string, \
             \"confidence\": number between 0 and 1, \"requiresUserDecision\": bool}}\n"
        );

        let materialized = MaterializedTask {
            task_id: Uuid::new_v4(),
            name: "logic-validator".to_string(),
            prompt,
            working_dir: std::env::temp_dir(),
            env_vars: Default::default(),
            model,
        };

        let outcome = run_to_completion(harness.as_ref(), &materialized)
            .await
            .map_err(AgentError::Other)?;

        let candidate = crate::judge::extract_json_block(&outcome.final_response);
        let verdict: LogicValidatorVerdict = serde_json::from_str(&candidate)
            .map_err(|e| AgentError::ParseFailure(format!("invalid logic validator JSON: {e}")))?;

        if verdict.requires_user_decision || verdict.confidence < 0.6 {
            Ok(EscalationOutcome::AwaitingUser)
        } else {
            Ok(EscalationOutcome::Resolved {
                recommendation: verdict.recommendation,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(limits: EscalationLimitsSection) -> EscalationEngine {
        EscalationEngine::new(Arc::new(HarnessRegistry::new()), limits)
    }

    #[tokio::test]
    async fn planner_escalation_yields_replan() {
        let engine = engine(EscalationLimitsSection {
            user: 3,
            planner: 3,
            logic_validator: 3,
            external_advisor: 3,
        });
        let outcome = engine
            .escalate(
                EscalationTarget::Planner,
                "scope too large",
                Some("t1"),
                "claude",
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            EscalationOutcome::Replan {
                related_task_id: Some("t1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn exceeding_limit_falls_through_to_user() {
        let engine = engine(EscalationLimitsSection {
            user: 3,
            planner: 1,
            logic_validator: 3,
            external_advisor: 3,
        });
        let _ = engine
            .escalate(EscalationTarget::Planner, "r1", None, "claude", None)
            .await
            .unwrap();
        let second = engine
            .escalate(EscalationTarget::Planner, "r2", None, "claude", None)
            .await
            .unwrap();
        assert_eq!(second, EscalationOutcome::AwaitingUser);
    }

    #[tokio::test]
    async fn external_advisor_falls_through_to_user() {
        let engine = engine(EscalationLimitsSection {
            user: 3,
            planner: 3,
            logic_validator: 3,
            external_advisor: 3,
        });
        let outcome = engine
            .escalate(
                EscalationTarget::ExternalAdvisor,
                "unimplemented path",
                None,
                "claude",
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome, EscalationOutcome::AwaitingUser);
    }

    #[test]
    fn resolve_with_no_pending_record_is_limit_reached() {
        let engine = engine(EscalationLimitsSection {
            user: 3,
            planner: 3,
            logic_validator: 3,
            external_advisor: 3,
        });
        let err = engine.resolve(EscalationTarget::User, "fixed").unwrap_err();
        assert!(matches!(err, PolicyError::EscalationLimitReached { .. }));
    }

    #[tokio::test]
    async fn resolve_marks_latest_unresolved_record() {
        let engine = engine(EscalationLimitsSection {
            user: 3,
            planner: 3,
            logic_validator: 3,
            external_advisor: 3,
        });
        engine
            .escalate(EscalationTarget::User, "need a decision", None, "claude", None)
            .await
            .unwrap();
        engine.resolve(EscalationTarget::User, "approved").unwrap();
        let records = engine.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolution.as_deref(), Some("approved"));
    }
}
