//! Top-level CLI error type.
//!
//! Defines [`OrchestratorError`], the unified error type for `crewctl`'s
//! environment-setup failures — the class of error that aborts before a run
//! begins rather than being folded into a per-agent blocker (§4.6, §10.3).
//! Each variant embeds "To fix: …" remediation text.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum OrchestratorError {
    /// No usable agent CLI command could be resolved.
    AgentCliNotFound { searched: Vec<String> },

    /// The artifact root could not be created or is not writable.
    ArtifactRootUnwritable { path: PathBuf, detail: String },

    /// `run-id` failed the lexicographic `run-YYYY-MM-DD-HHMMSS`-style pattern.
    InvalidRunId { run_id: String },

    /// The HTTP dashboard failed to bind its configured port.
    HttpBindFailed { port: u16, detail: String },

    /// A completed run's packet directory could not be read by `inspect`.
    PacketUnreadable { run_id: String, detail: String },

    /// The repository root is not a git working copy.
    NotAGitRepo { path: PathBuf },

    Config(crate::config::ConfigError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentCliNotFound { searched } => {
                write!(
                    f,
                    "no usable agent CLI command found (looked for: {}).\n  To fix: set AGENT_CLI_BIN to an explicit path, or install the agent CLI on PATH.",
                    searched.join(", ")
                )
            }
            Self::ArtifactRootUnwritable { path, detail } => {
                write!(
                    f,
                    "artifact root '{}' is not writable: {detail}\n  To fix: check permissions, or point [run].artifact_root at a writable directory.",
                    path.display()
                )
            }
            Self::InvalidRunId { run_id } => {
                write!(
                    f,
                    "invalid run id '{run_id}'.\n  To fix: pass --run-id in the form run-YYYY-MM-DD-HHMMSS, or omit it to auto-generate one."
                )
            }
            Self::HttpBindFailed { port, detail } => {
                write!(
                    f,
                    "failed to bind the dashboard to port {port}: {detail}\n  To fix: pass a different --port, or stop whatever else is listening on it."
                )
            }
            Self::PacketUnreadable { run_id, detail } => {
                write!(
                    f,
                    "could not read the evidence packet for run '{run_id}': {detail}\n  To fix: check that the run completed and pr-packets/{run_id}/ exists."
                )
            }
            Self::NotAGitRepo { path } => {
                write!(
                    f,
                    "'{}' is not a git working copy.\n  To fix: run crewctl from inside a git repository.",
                    path.display()
                )
            }
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<crate::config::ConfigError> for OrchestratorError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err)
    }
}
