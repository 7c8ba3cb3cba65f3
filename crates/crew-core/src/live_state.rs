//! Single-writer live-state JSON snapshot (§4.8).

use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::model::{truncate_chars, AgentState, AgentStatus, SubTask};

const ACTIVITY_LIMIT: usize = 20;
const MESSAGE_LIMIT: usize = 320;

#[derive(Serialize)]
pub struct PlanningEntry {
    pub name: String,
    pub scope: String,
    pub objective: String,
}

#[derive(Serialize)]
pub struct AgentSnapshot {
    pub name: String,
    pub scope: String,
    pub status: &'static str,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    #[serde(rename = "changedFileCount")]
    pub changed_file_count: usize,
    #[serde(rename = "startedAt")]
    pub started_at: Option<String>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<String>,
    #[serde(rename = "blockerReason")]
    pub blocker_reason: Option<String>,
    #[serde(rename = "latestMessage")]
    pub latest_message: Option<String>,
}

#[derive(Serialize)]
pub struct Snapshot {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub task: String,
    #[serde(rename = "taskMode")]
    pub task_mode: String,
    #[serde(rename = "overallState")]
    pub overall_state: String,
    pub tick: u64,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
    pub planning: Vec<PlanningEntry>,
    pub agents: Vec<AgentSnapshot>,
    pub activity: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
}

fn status_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Queued => "QUEUED",
        AgentStatus::Running => "RUNNING",
        AgentStatus::Done => "DONE",
        AgentStatus::Blocked => "BLOCKED",
    }
}

/// Build the dashboard payload for one tick. `agents` is sorted by name;
/// `plan` preserves plan order. The activity tail is the last 20 log lines
/// across all agents, most-recent last.
#[must_use]
pub fn build_snapshot(
    run_id: &str,
    task: &str,
    task_mode: &str,
    plan: &[SubTask],
    agents: &[AgentState],
    overall_state: &str,
    tick: u64,
    updated_at: &str,
) -> Snapshot {
    let planning = plan
        .iter()
        .map(|s| PlanningEntry {
            name: s.name.clone(),
            scope: s.scope.clone(),
            objective: s.objective.clone(),
        })
        .collect();

    let mut sorted: Vec<&AgentState> = agents.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let agent_snaps = sorted
        .iter()
        .map(|a| AgentSnapshot {
            name: a.name.clone(),
            scope: a.scope.clone(),
            status: status_str(a.status),
            thread_id: a.thread_id.clone(),
            exit_code: a.exit_code,
            changed_file_count: a.changed_files.len(),
            started_at: a.started_at.clone(),
            finished_at: a.finished_at.clone(),
            blocker_reason: a.blocker_reason.clone(),
            latest_message: a
                .log
                .last()
                .cloned()
                .map(|m| truncate_chars(&m, MESSAGE_LIMIT)),
        })
        .collect();

    let mut activity: Vec<String> = agents.iter().flat_map(|a| a.log.iter().cloned()).collect();
    if activity.len() > ACTIVITY_LIMIT {
        let drop = activity.len() - ACTIVITY_LIMIT;
        activity.drain(0..drop);
    }

    Snapshot {
        run_id: run_id.to_owned(),
        task: task.to_owned(),
        task_mode: task_mode.to_owned(),
        overall_state: overall_state.to_owned(),
        tick,
        updated_at: updated_at.to_owned(),
        planning,
        agents: agent_snaps,
        activity,
        finished: None,
    }
}

/// Convert one raw JSON line from an agent stream into a single human line
/// (§4.8 "Event summarization"). Non-JSON lines pass through unchanged up to
/// `MESSAGE_LIMIT` chars.
#[must_use]
pub fn summarize_event_line(line: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return truncate_chars(line, MESSAGE_LIMIT);
    };
    let Some(event_type) = value.get("type").and_then(Value::as_str) else {
        return truncate_chars(line, MESSAGE_LIMIT);
    };

    let summary = match event_type {
        "thread.started" => {
            let id = value.get("thread_id").and_then(Value::as_str).unwrap_or("?");
            format!("thread started: {id}")
        }
        "turn.failed" | "turn.blocked" | "error" => {
            let message = value.get("message").and_then(Value::as_str).unwrap_or("");
            format!("{event_type}: {message}")
        }
        _ if event_type.starts_with("item.") => {
            if let Some(text) = value.pointer("/item/details/text").and_then(Value::as_str) {
                if value.pointer("/item/details/type").and_then(Value::as_str) == Some("agent_message") {
                    text.trim().to_owned()
                } else {
                    format!("{event_type}: {}", value.pointer("/item/type").and_then(Value::as_str).unwrap_or(""))
                }
            } else if let Some(command) = value.pointer("/item/details/command").and_then(Value::as_str) {
                format!("command execution: {command}")
            } else {
                let item_type = value.pointer("/item/type").and_then(Value::as_str).unwrap_or("");
                format!("{event_type}: {item_type}")
            }
        }
        other => format!("{other}: {}", value.to_string().chars().take(64).collect::<String>()),
    };
    truncate_chars(&summary, MESSAGE_LIMIT)
}

/// Write `value` to `path` atomically: write a sibling temp file, then
/// rename over the target (§4.8 supplement; avoids torn reads).
///
/// # Errors
/// Returns any I/O error from the write or rename step.
pub fn write_snapshot_atomic(path: &Path, value: &Snapshot) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value).unwrap_or_default();
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)
}

/// Process-wide mutex guarding all writes visible to snapshotting (§5).
pub static SNAPSHOT_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn summarize_thread_started() {
        assert_eq!(
            summarize_event_line(r#"{"type":"thread.started","thread_id":"t1"}"#),
            "thread started: t1"
        );
    }

    #[test]
    fn summarize_turn_failed() {
        assert_eq!(
            summarize_event_line(r#"{"type":"turn.failed","message":"oops"}"#),
            "turn.failed: oops"
        );
    }

    #[test]
    fn summarize_agent_message_item() {
        let line = r#"{"type":"item.completed","item":{"type":"message","details":{"type":"agent_message","text":"  hi there  "}}}"#;
        assert_eq!(summarize_event_line(line), "hi there");
    }

    #[test]
    fn summarize_command_execution_item() {
        let line = r#"{"type":"item.completed","item":{"details":{"command":"cargo test"}}}"#;
        assert_eq!(summarize_event_line(line), "command execution: cargo test");
    }

    #[test]
    fn summarize_non_json_passes_through_truncated() {
        let long = "x".repeat(400);
        assert_eq!(summarize_event_line(&long).chars().count(), MESSAGE_LIMIT);
    }

    #[test]
    fn activity_tail_bounded_to_twenty() {
        let mut agent = AgentState::new("a".into(), String::new(), String::new(), Default::default(), Default::default());
        for i in 0..30 {
            agent.append_log(&format!("line {i}"));
        }
        let snapshot = build_snapshot("run-1", "task", "code", &[], std::slice::from_ref(&agent), "RUNNING", 1, "now");
        assert!(snapshot.activity.len() <= ACTIVITY_LIMIT);
    }

    #[test]
    fn agent_log_ring_bounded_to_six() {
        let mut agent = AgentState::new("a".into(), String::new(), String::new(), Default::default(), Default::default());
        for i in 0..10 {
            agent.append_log(&format!("line {i}"));
        }
        assert_eq!(agent.log.len(), 6);
        assert_eq!(agent.log[0], "line 4");
    }

    #[test]
    fn write_snapshot_atomic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live-state.json");
        let snapshot = build_snapshot("run-1", "task", "code", &[], &[], "RUNNING", 1, "now");
        write_snapshot_atomic(&path, &snapshot).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"runId\""));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
