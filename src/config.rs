//! `crewctl` run configuration (`.orchestrator/config.toml`).
//!
//! Defines the typed configuration for a run, including agent defaults,
//! artifact layout, contract-check wiring, and dashboard refresh periods.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crew_core::{SandboxMode, TaskMode};

/// Top-level `crewctl` configuration.
///
/// Parsed from `.orchestrator/config.toml`. Missing fields use sensible
/// defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Agent CLI invocation defaults.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_sandbox_mode")]
    pub sandbox_mode: String,
    #[serde(default)]
    pub task_mode: TaskModeConfig,
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_provider: Option<String>,
    #[serde(default)]
    pub cli_bin: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sandbox_mode: default_sandbox_mode(),
            task_mode: TaskModeConfig::default(),
            bypass: false,
            model: None,
            model_provider: None,
            cli_bin: None,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn sandbox(&self) -> SandboxMode {
        SandboxMode::normalize(&self.sandbox_mode)
    }
}

fn default_sandbox_mode() -> String {
    "workspace-write".to_owned()
}

/// Requested task mode, including the `auto` classifier option that has no
/// counterpart in [`crew_core::TaskMode`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskModeConfig {
    #[default]
    Auto,
    Code,
    Advisory,
}

impl TaskModeConfig {
    #[must_use]
    pub const fn requested(self) -> Option<TaskMode> {
        match self {
            Self::Auto => None,
            Self::Code => Some(TaskMode::Code),
            Self::Advisory => Some(TaskMode::Advisory),
        }
    }
}

/// Artifact layout and retry/backoff tuning.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
    #[serde(default)]
    pub default_root: String,
    #[serde(default = "default_planner_retry_limit")]
    pub planner_retry_limit: u32,
    #[serde(default = "default_agent_retry_limit")]
    pub agent_retry_limit: u32,
    #[serde(default = "default_agent_retry_delay_seconds")]
    pub agent_retry_delay_seconds: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            artifact_root: default_artifact_root(),
            default_root: String::new(),
            planner_retry_limit: default_planner_retry_limit(),
            agent_retry_limit: default_agent_retry_limit(),
            agent_retry_delay_seconds: default_agent_retry_delay_seconds(),
        }
    }
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from(".orchestrator")
}

const fn default_planner_retry_limit() -> u32 {
    crew_core::PLANNER_RETRY_LIMIT
}

const fn default_agent_retry_limit() -> u32 {
    crew_core::AGENT_RETRY_LIMIT
}

const fn default_agent_retry_delay_seconds() -> u64 {
    5
}

/// Contract-check wiring: which paths trigger it, and how to invoke it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractConfig {
    #[serde(default = "default_sensitive_prefixes")]
    pub sensitive_prefixes: Vec<String>,
    #[serde(default)]
    pub script: Option<PathBuf>,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self { sensitive_prefixes: default_sensitive_prefixes(), script: None }
    }
}

fn default_sensitive_prefixes() -> Vec<String> {
    vec!["protocol/".to_owned()]
}

/// Dashboard refresh periods and default web port.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_tui_period_ms")]
    pub tui_period_ms: u64,
    #[serde(default = "default_web_period_ms")]
    pub web_period_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            tui_period_ms: default_tui_period_ms(),
            web_period_ms: default_web_period_ms(),
        }
    }
}

const fn default_web_port() -> u16 {
    4173
}

const fn default_tui_period_ms() -> u64 {
    350
}

const fn default_web_period_ms() -> u64 {
    600
}

/// Error loading a `crewctl` configuration file.
#[derive(Debug)]
pub struct ConfigError {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError { path: Some(path.to_owned()), message: format!("could not read file: {e}") });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError { path: None, message }
        })
    }

    /// Overlay the §6 environment-variable overrides onto a loaded config.
    #[must_use]
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("AGENT_SANDBOX_MODE") {
            self.agent.sandbox_mode = v;
        }
        if let Ok(v) = std::env::var("AGENT_TASK_MODE") {
            self.agent.task_mode = match v.as_str() {
                "code" => TaskModeConfig::Code,
                "advisory" => TaskModeConfig::Advisory,
                _ => TaskModeConfig::Auto,
            };
        }
        if let Ok(v) = std::env::var("AGENT_BYPASS_SANDBOX") {
            self.agent.bypass = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("AGENT_MODEL") {
            self.agent.model = Some(v);
        }
        if let Ok(v) = std::env::var("AGENT_MODEL_PROVIDER") {
            self.agent.model_provider = Some(v);
        }
        if let Ok(v) = std::env::var("AGENT_CLI_BIN") {
            self.agent.cli_bin = Some(v);
        }
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.agent.sandbox_mode, "workspace-write");
        assert_eq!(cfg.agent.task_mode, TaskModeConfig::Auto);
        assert!(!cfg.agent.bypass);
        assert_eq!(cfg.run.artifact_root, PathBuf::from(".orchestrator"));
        assert_eq!(cfg.run.planner_retry_limit, crew_core::PLANNER_RETRY_LIMIT);
        assert_eq!(cfg.contract.sensitive_prefixes, vec!["protocol/".to_owned()]);
        assert_eq!(cfg.dashboard.port, 4173);
    }

    #[test]
    fn parse_empty_string_yields_defaults() {
        let cfg = OrchestratorConfig::parse("").unwrap();
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[agent]
sandbox_mode = "read-only"
task_mode = "code"
bypass = true
model = "gpt-5"

[run]
artifact_root = "artifacts"
default_root = "codex-rs"
agent_retry_limit = 5

[contract]
sensitive_prefixes = ["protocol/", "wire/"]
script = "scripts/contract-check.sh"

[dashboard]
port = 9000
"#;
        let cfg = OrchestratorConfig::parse(toml).unwrap();
        assert_eq!(cfg.agent.sandbox_mode, "read-only");
        assert_eq!(cfg.agent.task_mode, TaskModeConfig::Code);
        assert!(cfg.agent.bypass);
        assert_eq!(cfg.agent.model.as_deref(), Some("gpt-5"));
        assert_eq!(cfg.run.artifact_root, PathBuf::from("artifacts"));
        assert_eq!(cfg.run.agent_retry_limit, 5);
        assert_eq!(cfg.contract.sensitive_prefixes, vec!["protocol/", "wire/"]);
        assert_eq!(cfg.dashboard.port, 9000);
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = OrchestratorConfig::parse("unknown_field = true").unwrap_err();
        assert!(err.message.contains("unknown field"));
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let toml = "[agent]\nbypass = \"not-a-bool\"\n";
        let err = OrchestratorConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("line"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = OrchestratorConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[run]\ndefault_root = \"codex-rs\"\n").unwrap();
        let cfg = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(cfg.run.default_root, "codex-rs");
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = OrchestratorConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn env_overrides_noop_when_unset() {
        // Process-wide env mutation in a parallel test binary is unsafe and
        // flaky; this only exercises the no-override path (§6's overrides
        // are each individually optional).
        let cfg = OrchestratorConfig::default().apply_env_overrides();
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn task_mode_config_requested_mapping() {
        assert_eq!(TaskModeConfig::Auto.requested(), None);
        assert_eq!(TaskModeConfig::Code.requested(), Some(TaskMode::Code));
        assert_eq!(TaskModeConfig::Advisory.requested(), Some(TaskMode::Advisory));
    }
}
