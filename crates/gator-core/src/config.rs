//! Typed configuration, layered file -> env -> CLI flags.
//!
//! Every field carries
//! `serde(default)` so a partial `gator.toml` is valid; `Config::validate`
//! runs once, after layering, and aggregates every violation into a single
//! `ConfigError::Invalid` rather than failing on the first one found.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_max_workers() -> usize {
    3
}
fn default_judge_task_retries() -> u32 {
    3
}
fn default_planner_quality_retries() -> u32 {
    5
}
fn default_orchestrate_main_loop() -> u32 {
    3
}
fn default_serial_chain_task_retries() -> u32 {
    3
}
fn default_quality_threshold() -> f64 {
    60.0
}
fn default_max_task_duration_secs() -> u64 {
    3600
}
fn default_max_tasks() -> usize {
    20
}
fn default_escalation_limit() -> u32 {
    3
}
fn default_step_iterations() -> u32 {
    20
}
fn default_similarity_threshold() -> f64 {
    0.9
}
fn default_similarity_window() -> usize {
    3
}
fn default_min_occurrences() -> u32 {
    3
}
fn default_root() -> PathBuf {
    PathBuf::from(".gator")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_agent_type() -> String {
    "claude".to_string()
}
fn default_integration_method() -> IntegrationMethod {
    IntegrationMethod::Auto
}
fn default_check_failure_mode() -> CheckFailureModeConfig {
    CheckFailureModeConfig::Warn
}
fn default_on_loop() -> LoopAction {
    LoopAction::Escalate
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationMethod {
    Pr,
    Command,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckFailureModeConfig {
    Block,
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopAction {
    Abort,
    Escalate,
    ForceContinue,
    RetryWithHint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
}

impl Default for AgentKind {
    fn default() -> Self {
        AgentKind::Claude
    }
}

impl AgentKind {
    /// The `HarnessRegistry` key this kind resolves to.
    pub fn harness_name(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude-code",
            AgentKind::Codex => "codex",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSelection {
    pub kind: AgentKind,
    pub model: String,
}

impl Default for AgentSelection {
    fn default() -> Self {
        Self {
            kind: AgentKind::Claude,
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningSection {
    pub quality_threshold: f64,
    pub strict_context_validation: bool,
    pub max_task_duration_secs: u64,
    pub max_tasks: usize,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            strict_context_validation: false,
            max_task_duration_secs: default_max_task_duration_secs(),
            max_tasks: default_max_tasks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksSection {
    pub enabled: bool,
    pub failure_mode: CheckFailureModeConfig,
}

impl Default for ChecksSection {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_mode: default_check_failure_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSection {
    pub method: IntegrationMethod,
}

impl Default for IntegrationSection {
    fn default() -> Self {
        Self {
            method: default_integration_method(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationLimitsSection {
    pub user: u32,
    pub planner: u32,
    pub logic_validator: u32,
    pub external_advisor: u32,
}

impl Default for EscalationLimitsSection {
    fn default() -> Self {
        Self {
            user: default_escalation_limit(),
            planner: default_escalation_limit(),
            logic_validator: default_escalation_limit(),
            external_advisor: default_escalation_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxStepIterationsSection {
    pub default: u32,
    pub worker: u32,
    pub judge: u32,
    pub replan: u32,
}

impl Default for MaxStepIterationsSection {
    fn default() -> Self {
        Self {
            default: default_step_iterations(),
            worker: default_step_iterations(),
            judge: default_step_iterations(),
            replan: default_step_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityDetectionSection {
    pub threshold: f64,
    pub window_size: usize,
}

impl Default for SimilarityDetectionSection {
    fn default() -> Self {
        Self {
            threshold: default_similarity_threshold(),
            window_size: default_similarity_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionPatternDetectionSection {
    pub min_occurrences: u32,
}

impl Default for TransitionPatternDetectionSection {
    fn default() -> Self {
        Self {
            min_occurrences: default_min_occurrences(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnLoopSection {
    pub default: LoopAction,
}

impl Default for OnLoopSection {
    fn default() -> Self {
        Self {
            default: default_on_loop(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectionSection {
    pub enabled: bool,
    pub max_step_iterations: MaxStepIterationsSection,
    pub similarity_detection: SimilarityDetectionSection,
    pub transition_pattern_detection: TransitionPatternDetectionSection,
    pub on_loop: OnLoopSection,
}

impl Default for LoopDetectionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_step_iterations: MaxStepIterationsSection::default(),
            similarity_detection: SimilarityDetectionSection::default(),
            transition_pattern_detection: TransitionPatternDetectionSection::default(),
            on_loop: OnLoopSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub planner: AgentSelection,
    pub worker: AgentSelection,
    pub judge: AgentSelection,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            planner: AgentSelection::default(),
            worker: AgentSelection::default(),
            judge: AgentSelection::default(),
        }
    }
}

/// Top-level configuration record, layered from defaults, file, env, and CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_judge_task_retries")]
    pub judge_task_retries: u32,
    #[serde(default = "default_planner_quality_retries")]
    pub planner_quality_retries: u32,
    #[serde(default = "default_orchestrate_main_loop")]
    pub orchestrate_main_loop: u32,
    #[serde(default = "default_serial_chain_task_retries")]
    pub serial_chain_task_retries: u32,

    pub planning: PlanningSection,
    pub checks: ChecksSection,
    pub integration: IntegrationSection,
    pub escalation_limits: EscalationLimitsSection,
    pub loop_detection: LoopDetectionSection,
    pub agents: AgentsSection,

    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            judge_task_retries: default_judge_task_retries(),
            planner_quality_retries: default_planner_quality_retries(),
            orchestrate_main_loop: default_orchestrate_main_loop(),
            serial_chain_task_retries: default_serial_chain_task_retries(),
            planning: PlanningSection::default(),
            checks: ChecksSection::default(),
            integration: IntegrationSection::default(),
            escalation_limits: EscalationLimitsSection::default(),
            loop_detection: LoopDetectionSection::default(),
            agents: AgentsSection::default(),
            root: default_root(),
            log_level: default_log_level(),
        }
    }
}

/// Overrides layered on top of file+env config, typically sourced from CLI
/// flags. `None` fields leave the lower-precedence value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_workers: Option<usize>,
    pub root: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load `built-in defaults -> file -> GATOR_* env -> overrides`, then
    /// validate. `path` is only required to exist if it was explicitly
    /// supplied by the caller (e.g. `--config`); a missing default path is
    /// silently treated as "use built-in defaults".
    pub fn load(
        path: Option<&Path>,
        explicit: bool,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let body = std::fs::read_to_string(p)?;
                toml::from_str(&body)?
            }
            Some(p) if explicit => {
                return Err(ConfigError::NotFound(p.display().to_string()));
            }
            _ => Config::default(),
        };

        config.apply_env();
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("GATOR_MAX_WORKERS") {
            if let Ok(n) = v.parse() {
                self.max_workers = n;
            }
        }
        if let Ok(v) = std::env::var("GATOR_ROOT") {
            self.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GATOR_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(n) = overrides.max_workers {
            self.max_workers = n;
        }
        if let Some(root) = &overrides.root {
            self.root = root.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
    }

    /// Reject out-of-range values, aggregating every violation rather than
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.max_workers == 0 {
            errors.push("maxWorkers must be >= 1".to_string());
        }
        if !(0.0..=100.0).contains(&self.planning.quality_threshold) {
            errors.push("planning.qualityThreshold must be within [0,100]".to_string());
        }
        if self.planning.max_tasks == 0 {
            errors.push("planning.maxTasks must be >= 1".to_string());
        }
        for (name, value) in [
            ("escalationLimits.user", self.escalation_limits.user),
            ("escalationLimits.planner", self.escalation_limits.planner),
            (
                "escalationLimits.logicValidator",
                self.escalation_limits.logic_validator,
            ),
            (
                "escalationLimits.externalAdvisor",
                self.escalation_limits.external_advisor,
            ),
        ] {
            if value < 1 {
                errors.push(format!("{name} must be >= 1"));
            }
        }
        if !(0.0..=1.0).contains(&self.loop_detection.similarity_detection.threshold) {
            errors.push("loopDetection.similarityDetection.threshold must be within [0,1]".to_string());
        }
        if self.loop_detection.similarity_detection.window_size == 0 {
            errors.push("loopDetection.similarityDetection.windowSize must be >= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Write a starter config with every field at its default value.
    pub fn write_starter(path: &Path) -> std::io::Result<()> {
        let config = Config::default();
        let body = toml::to_string_pretty(&config)
            .expect("default Config always serializes");
        std::fs::write(path, body)
    }
}

// kept for readability of agent-role lookups: AgentSelection has no
// behavior of its own, just data the harness-selection call sites read.
#[allow(dead_code)]
fn _silence_unused(_: &str) {
    let _ = default_agent_type();
    let _ = default_true();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_max_workers_is_invalid() {
        let mut config = Config::default();
        config.max_workers = 0;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid(messages) => {
                assert!(messages.iter().any(|m| m.contains("maxWorkers")));
            }
            _ => panic!("expected Invalid"),
        }
    }

    #[test]
    fn aggregates_every_violation() {
        let mut config = Config::default();
        config.max_workers = 0;
        config.planning.quality_threshold = 200.0;
        config.escalation_limits.user = 0;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid(messages) => assert_eq!(messages.len(), 3),
            _ => panic!("expected Invalid"),
        }
    }

    #[test]
    fn load_missing_default_path_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(
            Some(&dir.path().join("gator.toml")),
            false,
            &ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.max_workers, 3);
    }

    #[test]
    fn load_missing_explicit_path_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(
            Some(&dir.path().join("missing.toml")),
            true,
            &ConfigOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gator.toml");
        std::fs::write(&path, "max_workers = 7\n").unwrap();
        let config = Config::load(Some(&path), true, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.max_workers, 7);
        assert_eq!(config.planning.max_tasks, 20);
    }

    #[test]
    fn cli_override_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gator.toml");
        std::fs::write(&path, "max_workers = 7\n").unwrap();
        let overrides = ConfigOverrides {
            max_workers: Some(9),
            ..Default::default()
        };
        let config = Config::load(Some(&path), true, &overrides).unwrap();
        assert_eq!(config.max_workers, 9);
    }
}
