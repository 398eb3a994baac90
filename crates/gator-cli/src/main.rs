mod cleanup_cmd;
mod config;
mod dispatch_cmd;
mod log_cmd;
mod merge_cmd;
mod report_cmd;
mod resolve;
mod status_cmd;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use gator_core::config::{Config, ConfigOverrides};

#[derive(Parser)]
#[command(name = "gator", about = "multi-agent task orchestrator for autonomous code modification")]
struct Cli {
    /// Path to the gator config file (defaults to the XDG config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured coordination root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Override the configured max worker count
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Dispatch an instruction to the orchestrator and run to completion
    /// (or until it pauses on a user escalation)
    Dispatch {
        /// Path to the repository to operate on
        #[arg(long, default_value = ".")]
        repo_path: PathBuf,
        /// Logical repository identifier recorded on tasks
        #[arg(long)]
        repo: String,
        /// Base branch tasks are created from and integrated back onto
        #[arg(long, default_value = "main")]
        base_branch: String,
        /// Natural-language instruction describing the work to perform
        instruction: String,
    },
    /// Show session and task status
    Status {
        /// Session ID to show detail for (omit to list all sessions)
        session_id: Option<String>,
    },
    /// Show run history and agent output for a task
    Log {
        /// Task ID to show runs for
        task_id: String,
        /// Only print the run list, not the latest run's raw log
        #[arg(long)]
        summary_only: bool,
    },
    /// Regenerate the Markdown reports for a session
    Report {
        /// Session ID to report on
        session_id: String,
        /// Original instruction, echoed into the planning report
        #[arg(long, default_value = "")]
        instruction: String,
    },
    /// Re-run integration for a session (e.g. after resolving conflicts)
    Merge {
        /// Path to the repository to operate on
        #[arg(long, default_value = ".")]
        repo_path: PathBuf,
        /// Session ID to integrate
        session_id: String,
    },
    /// Remove worktrees for terminal tasks and prune stale git metadata
    Cleanup {
        /// Path to the repository to operate on
        #[arg(long, default_value = ".")]
        repo_path: PathBuf,
        /// Remove worktrees for every task, not just terminal ones
        #[arg(long)]
        all: bool,
    },
    /// Clear a BLOCKED task's escalation and return it to READY
    Resolve {
        /// Task ID to resolve
        task_id: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);
    let explicit = cli.config.is_some();
    let overrides = ConfigOverrides {
        max_workers: cli.max_workers,
        root: cli.root.clone(),
        log_level: cli.log_level.clone(),
    };
    Config::load(Some(&path), explicit, &overrides).context("failed to load config")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
        config::cmd_init(*force)?;
        return Ok(());
    }

    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Dispatch {
            repo_path,
            repo,
            base_branch,
            instruction,
        } => {
            let outcome =
                dispatch_cmd::run_dispatch(config, &repo_path, &repo, &base_branch, &instruction)
                    .await?;
            std::process::exit(outcome.exit_code());
        }
        Commands::Status { session_id } => {
            status_cmd::run_status(&config, session_id.as_deref())?;
        }
        Commands::Log { task_id, summary_only } => {
            log_cmd::run_log(&config, &task_id, summary_only)?;
        }
        Commands::Report { session_id, instruction } => {
            report_cmd::run_report(&config, &session_id, &instruction)?;
        }
        Commands::Merge { repo_path, session_id } => {
            merge_cmd::run_merge(&config, &repo_path, &session_id)?;
        }
        Commands::Cleanup { repo_path, all } => {
            cleanup_cmd::run_cleanup(&config, &repo_path, all)?;
        }
        Commands::Resolve { task_id } => {
            resolve::run_resolve(&config, &task_id)?;
        }
    }

    Ok(())
}
