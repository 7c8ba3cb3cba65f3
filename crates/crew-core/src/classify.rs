//! Substring classifiers for transient stream errors, write-restricted
//! output, and auto task-mode inference (§4.3, §4.6, §7).

use crate::model::TaskMode;

const TRANSIENT_HINTS: &[&str] = &[
    "reconnecting",
    "stream disconnected",
    "websocket closed",
    "response.completed",
    "connection reset",
    "connection closed",
    "socket closed",
];

/// Substring-matched (case-insensitive) against agent error/last-message text.
/// A match means the failure is worth retrying without operator involvement.
#[must_use]
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_HINTS.iter().any(|hint| lower.contains(hint))
}

const WRITE_RESTRICTION_HINTS: &[&str] = &[
    "all write attempts were rejected",
    "blocked from writing",
    "permission denied",
    "apply_patch",
    "not allowed to",
    "not permitted to",
    "cannot write",
    "unable to write",
    "write access",
    "read-only",
    "read only",
    "outside of the project",
    "outside the project",
    "sandbox prevented",
];

/// True iff `message` contains a phrase indicating the platform rejected
/// writes, even though the agent process exited cleanly.
#[must_use]
pub fn is_write_restricted(message: &str) -> bool {
    let lower = message.to_lowercase();
    WRITE_RESTRICTION_HINTS.iter().any(|hint| lower.contains(hint))
}

const ADVISORY_PHRASES: &[&str] = &[
    "checklist",
    "plan this project",
    "give me advice",
    "what should i",
    "how should i approach",
    "recommend an approach",
    "analysis only",
    "no code changes",
    "in phases",
];

const CODE_PHRASES: &[&str] = &[
    "implement",
    "fix the bug",
    "write code",
    "add a function",
    "refactor",
    "write a test",
    "create a file",
    "modify the file",
];

/// Classify `task` as code or advisory when `requested` is `auto`: advisory
/// when an advisory phrase matches and no code phrase does; otherwise code.
#[must_use]
pub fn infer_task_mode(task: &str, requested: Option<TaskMode>) -> TaskMode {
    if let Some(mode) = requested {
        return mode;
    }
    let lower = task.to_lowercase();
    let advisory_hit = ADVISORY_PHRASES.iter().any(|p| lower.contains(p));
    let code_hit = CODE_PHRASES.iter().any(|p| lower.contains(p));
    if advisory_hit && !code_hit {
        TaskMode::Advisory
    } else {
        TaskMode::Code
    }
}
