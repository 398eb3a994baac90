//! `gator dispatch` command: run an instruction through the orchestrator
//! to a terminal session outcome.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use gator_core::agent_harness::{ClaudeCodeAdapter, CodexAdapter, HarnessRegistry};
use gator_core::config::Config;
use gator_core::integrator::FinalizationOutcome;
use gator_core::orchestrator::{OrchestratorLoop, SessionOutcome};
use gator_core::vcs::{GitDriver, VcsDriver};

/// Run `instruction` to completion (or until it pauses on a user
/// escalation). Resumes the latest session under `config.root` if one was
/// left mid-flight.
pub async fn run_dispatch(
    config: Config,
    repo_path: &Path,
    repo: &str,
    base_branch: &str,
    instruction: &str,
) -> Result<SessionOutcome> {
    let vcs: Arc<dyn VcsDriver> =
        Arc::new(GitDriver::new(repo_path, None).context("failed to open repository")?);

    let mut registry = HarnessRegistry::new();
    registry.register(ClaudeCodeAdapter::new());
    registry.register(CodexAdapter::new());
    let harnesses = Arc::new(registry);

    let orchestrator = OrchestratorLoop::new(config, repo_path, repo, base_branch, vcs, harnesses);

    let outcome = orchestrator.run(instruction).await?;
    orchestrator
        .generate_report(outcome.session_id(), instruction)
        .context("failed to generate session reports")?;

    print_outcome(&outcome);
    Ok(outcome)
}

fn print_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Completed { session_id, integration } => {
            println!("Session {session_id} completed.");
            println!("Integration branch: {}", integration.integration_branch);
            if let Some(finalization) = &integration.finalization {
                println!("{}", describe_finalization(finalization));
            }
        }
        SessionOutcome::CompletedNoTasks { session_id } => {
            println!("Session {session_id} completed: the planner produced no tasks.");
        }
        SessionOutcome::IntegrationConflicts { session_id, integration } => {
            println!(
                "Session {session_id} finished with {} unresolved conflict(s) on {}.",
                integration.conflicted.len(),
                integration.integration_branch
            );
            for c in &integration.conflicted {
                println!(
                    "  - {} (branch {}) -> conflict-resolution task {}",
                    c.task_id, c.branch, c.conflict_task_id
                );
            }
        }
        SessionOutcome::AwaitingUser { session_id, reason } => {
            println!("Session {session_id} is paused awaiting user input: {reason}");
            println!("Run `gator resolve <task-id>` once you've decided, then re-run dispatch.");
        }
        SessionOutcome::Failed { session_id, reason } => {
            println!("Session {session_id} failed: {reason}");
        }
        SessionOutcome::Cancelled { session_id } => {
            println!("Session {session_id} was cancelled; in-flight tasks were marked CANCELLED.");
        }
    }
}

fn describe_finalization(f: &FinalizationOutcome) -> String {
    match f {
        FinalizationOutcome::Command { command } => format!("To merge: {command}"),
        FinalizationOutcome::PullRequest { url } => format!("Pull request opened: {url}"),
        FinalizationOutcome::NoRemote => {
            "integration.method=pr requested but the repository has no remote".to_string()
        }
    }
}
