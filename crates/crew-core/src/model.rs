//! Core entities: SubTask, Plan, AgentState, RunVerdict.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution mode for a run. `Code` requires in-scope file changes from
/// every agent; `Advisory` requires that none are produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    Code,
    Advisory,
}

/// Sandbox mode passed through to the agent CLI. Any value outside this set
/// is coerced to `WorkspaceWrite` (see [`SandboxMode::normalize`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "read-only" => Self::ReadOnly,
            "danger-full-access" => Self::DangerFullAccess,
            _ => Self::WorkspaceWrite,
        }
    }

    #[must_use]
    pub const fn as_flag(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::DangerFullAccess => "danger-full-access",
        }
    }
}

/// One unit of work in a [`Plan`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub name: String,
    /// Canonicalized path-like scope (empty ⇒ entire repository) in code
    /// mode, or a short topic tag in advisory mode.
    pub scope: String,
    pub objective: String,
}

/// An ordered, pairwise-disjoint-in-scope sequence of [`SubTask`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub subtasks: Vec<SubTask>,
}

/// Lifecycle status of one [`AgentState`]. BLOCKED and DONE are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Queued,
    Running,
    Done,
    Blocked,
}

/// Runtime record of one SubTask's execution, mutated only by its own
/// supervisor (see §5 of the governing specification).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub scope: String,
    pub objective: String,
    #[serde(skip)]
    pub workspace: PathBuf,
    #[serde(skip)]
    pub coord_dir: PathBuf,
    pub status: AgentStatus,
    pub thread_id: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub exit_code: Option<i32>,
    pub changed_files: Vec<PathBuf>,
    pub blocker_reason: Option<String>,
    pub last_message: Option<String>,
    pub log: Vec<String>,
}

impl AgentState {
    #[must_use]
    pub fn new(name: String, scope: String, objective: String, workspace: PathBuf, coord_dir: PathBuf) -> Self {
        Self {
            name,
            scope,
            objective,
            workspace,
            coord_dir,
            status: AgentStatus::Queued,
            thread_id: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            exit_code: None,
            changed_files: Vec::new(),
            blocker_reason: None,
            last_message: None,
            log: Vec::new(),
        }
    }

    /// Append a line to the bounded 6-entry ring buffer, truncating to 320
    /// chars (§4.8, §8 property 4).
    pub fn append_log(&mut self, line: &str) {
        let truncated = truncate_chars(line, 320);
        self.log.push(truncated);
        let len = self.log.len();
        if len > 6 {
            self.log.drain(0..len - 6);
        }
    }
}

/// Truncate a string to at most `max` chars (not bytes), UTF-8 safe.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        s.chars().take(max).collect()
    }
}

/// Overall outcome of a run. Monotone: any BLOCKED gate yields BLOCKED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunVerdict {
    Done,
    Blocked,
}

impl RunVerdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "DONE",
            Self::Blocked => "BLOCKED",
        }
    }
}

/// Linear backoff delay for retry attempt `n` (1-indexed).
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}
