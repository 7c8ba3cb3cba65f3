//! Per-SubTask execution state machine: write-preflight, prompt
//! construction, retry loop, and outcome classification (§4.3).

use std::path::PathBuf;
use std::time::Duration;

use crate::agent_runner::AgentRunResult;
use crate::classify::{is_transient, is_write_restricted};
use crate::live_state::summarize_event_line;
use crate::model::{backoff_delay, AgentState, AgentStatus, TaskMode};
use crate::scope::in_scope;

pub const AGENT_RETRY_LIMIT: u32 = 3;

/// Build the deterministic prompt for one sub-agent (§4.3 step 3). The code
/// template demands a minimal, in-scope change set; the advisory template
/// forbids any file changes.
#[must_use]
pub fn build_prompt(name: &str, scope: &str, objective: &str, mode: TaskMode) -> String {
    let scope_display = if scope.is_empty() { "the entire repository" } else { scope };
    match mode {
        TaskMode::Code => format!(
            "You are sub-agent '{name}'. Your scope is strictly limited to: {scope_display}.\n\
             Objective: {objective}\n\n\
             Make the minimal change set required to accomplish the objective. Do not touch \
             any file outside your scope. When finished, describe exactly what you changed and \
             why in your final message."
        ),
        TaskMode::Advisory => format!(
            "You are advisory sub-agent '{name}'. Your topic is: {scope_display}.\n\
             Objective: {objective}\n\n\
             Provide analysis and guidance only. Do not create, modify, or delete any file. \
             Respond with your findings and recommendations as your final message."
        ),
    }
}

/// Classify one attempt's outcome into a blocker reason, or `None` on
/// success, following the precedence order in §4.3 step 4c.
#[must_use]
pub fn classify_outcome(
    mode: TaskMode,
    result: &AgentRunResult,
    changed: &[PathBuf],
    scope: &str,
    default_root: &str,
) -> Option<String> {
    if let Some(err) = &result.error {
        return Some(err.clone());
    }
    if mode == TaskMode::Code && is_write_restricted(&result.last_message) {
        return Some("Platform write restriction detected from agent output.".to_owned());
    }
    if result.exit_code != 0 {
        return Some("Agent exited with non-zero status.".to_owned());
    }
    let out_of_scope: Vec<String> = changed
        .iter()
        .filter(|p| !in_scope(&p.to_string_lossy(), scope, default_root))
        .take(5)
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    if !out_of_scope.is_empty() {
        return Some(format!("Scope violation: edited {}", out_of_scope.join(", ")));
    }
    match mode {
        TaskMode::Code if changed.is_empty() => Some(
            "No file changes were produced; execution was blocked or task was not executed."
                .to_owned(),
        ),
        TaskMode::Advisory if !changed.is_empty() => {
            Some("Unexpected file changes were produced for an advisory task.".to_owned())
        }
        _ => None,
    }
}

/// Run one sub-task to completion against injected collaborators, so the
/// retry/classification logic can be tested without a real subprocess or git
/// checkout. `invoke` runs one agent attempt given the prompt and a per-line
/// callback it should forward every raw agent stream line through (§4.8
/// event summarization feeds the live log from here, not just the final
/// message); `changed_files` refreshes the workspace's changed-path list;
/// `preflight` probes writability; `sleep` performs (or, in tests, skips)
/// the backoff delay; `now` supplies the wall-clock timestamp string
/// recorded on start/finish. `retry_limit` caps the number of attempts
/// (configurable via `.orchestrator/config.toml`'s `run.agent_retry_limit`,
/// defaulting to [`AGENT_RETRY_LIMIT`]).
#[allow(clippy::too_many_arguments)]
pub fn run(
    name: &str,
    scope: &str,
    objective: &str,
    mode: TaskMode,
    default_root: &str,
    require_file_changes: bool,
    retry_delay: Duration,
    retry_limit: u32,
    mut invoke: impl FnMut(&str, &mut dyn FnMut(&str)) -> std::io::Result<AgentRunResult>,
    mut changed_files: impl FnMut() -> std::io::Result<Vec<PathBuf>>,
    mut preflight: impl FnMut() -> Result<(), String>,
    mut sleep: impl FnMut(Duration),
    mut now: impl FnMut() -> String,
) -> AgentState {
    let mut state = AgentState::new(
        name.to_owned(),
        scope.to_owned(),
        objective.to_owned(),
        PathBuf::new(),
        PathBuf::new(),
    );
    state.status = AgentStatus::Running;
    state.started_at = Some(now());
    let clock = std::time::Instant::now();

    if require_file_changes
        && let Err(msg) = preflight()
    {
        state.status = AgentStatus::Blocked;
        state.blocker_reason = Some(format!("Workspace write probe failed: {msg}"));
        state.finished_at = Some(now());
        state.duration_ms = Some(u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX));
        return state;
    }

    let prompt = build_prompt(name, scope, objective, mode);
    let mut attempt = 0u32;
    let mut blocker: Option<String> = None;
    let mut last_result = AgentRunResult::default();
    let mut changed = Vec::new();

    while attempt < retry_limit {
        attempt += 1;
        let log_len_before = state.log.len();
        let result = {
            let mut on_line = |line: &str| state.append_log(&summarize_event_line(line));
            match invoke(&prompt, &mut on_line) {
                Ok(r) => r,
                Err(e) => AgentRunResult {
                    error: Some(format!("Internal agent failure: {e}")),
                    ..Default::default()
                },
            }
        };
        changed = changed_files().unwrap_or_default();
        blocker = classify_outcome(mode, &result, &changed, scope, default_root);
        last_result = result;
        // Fall back to the final message only if the attempt streamed no
        // observable lines at all (e.g. the internal-failure path above,
        // which never reaches a real agent stream).
        if state.log.len() == log_len_before {
            state.append_log(&last_result.last_message);
        }

        let is_retryable = blocker
            .as_deref()
            .is_some_and(is_transient)
            && attempt < retry_limit;
        if blocker.is_none() || !is_retryable {
            break;
        }
        tracing::warn!(agent = %name, attempt, reason = blocker.as_deref().unwrap_or(""), "retrying after transient error");
        sleep(backoff_delay(retry_delay, attempt));
    }

    state.thread_id = last_result.thread_id;
    state.exit_code = Some(last_result.exit_code);
    state.last_message = Some(last_result.last_message);
    state.changed_files = changed;
    state.finished_at = Some(now());
    state.duration_ms = Some(u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX));

    if let Some(reason) = blocker {
        state.status = AgentStatus::Blocked;
        state.blocker_reason = Some(reason);
    } else {
        state.status = AgentStatus::Done;
    }

    state
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ok_result() -> AgentRunResult {
        AgentRunResult { exit_code: 0, thread_id: Some("t1".into()), last_message: "done".into(), error: None }
    }

    #[test]
    fn classify_prefers_runner_error() {
        let result = AgentRunResult { error: Some("boom".into()), ..Default::default() };
        let blocker = classify_outcome(TaskMode::Code, &result, &[], "", "");
        assert_eq!(blocker, Some("boom".into()));
    }

    #[test]
    fn classify_detects_write_restriction_before_nonzero_exit() {
        let result = AgentRunResult {
            exit_code: 1,
            last_message: "All write attempts were rejected.".into(),
            ..Default::default()
        };
        let blocker = classify_outcome(TaskMode::Code, &result, &[], "", "");
        assert_eq!(blocker, Some("Platform write restriction detected from agent output.".into()));
    }

    #[test]
    fn classify_flags_out_of_scope_changes() {
        let changed = vec![PathBuf::from("outside/file.rs")];
        let blocker = classify_outcome(TaskMode::Code, &ok_result(), &changed, "inside", "");
        assert!(blocker.unwrap().starts_with("Scope violation"));
    }

    #[test]
    fn classify_requires_changes_in_code_mode() {
        let blocker = classify_outcome(TaskMode::Code, &ok_result(), &[], "", "");
        assert!(blocker.unwrap().starts_with("No file changes"));
    }

    #[test]
    fn classify_rejects_changes_in_advisory_mode() {
        let changed = vec![PathBuf::from("a.txt")];
        let blocker = classify_outcome(TaskMode::Advisory, &ok_result(), &changed, "", "");
        assert!(blocker.unwrap().starts_with("Unexpected file changes"));
    }

    #[test]
    fn classify_succeeds_on_clean_in_scope_change() {
        let changed = vec![PathBuf::from("src/lib.rs")];
        let blocker = classify_outcome(TaskMode::Code, &ok_result(), &changed, "src", "");
        assert!(blocker.is_none());
    }

    #[test]
    fn run_retries_transient_errors_then_succeeds() {
        let mut call = 0;
        let state = run(
            "agent-a",
            "src",
            "do thing",
            TaskMode::Code,
            "",
            true,
            Duration::from_millis(0),
            AGENT_RETRY_LIMIT,
            |_prompt, _on_line| {
                call += 1;
                if call < 2 {
                    Ok(AgentRunResult { error: Some("connection reset".into()), ..Default::default() })
                } else {
                    Ok(ok_result())
                }
            },
            || Ok(vec![PathBuf::from("src/lib.rs")]),
            || Ok(()),
            |_| {},
            || "now".to_owned(),
        );
        assert_eq!(state.status, AgentStatus::Done);
        assert_eq!(call, 2);
    }

    #[test]
    fn run_does_not_retry_nontransient_blockers() {
        let mut call = 0;
        let state = run(
            "agent-a",
            "",
            "do thing",
            TaskMode::Code,
            "",
            true,
            Duration::from_millis(0),
            AGENT_RETRY_LIMIT,
            |_, _| {
                call += 1;
                Ok(AgentRunResult { exit_code: 1, ..Default::default() })
            },
            || Ok(vec![]),
            || Ok(()),
            |_| {},
            || "now".to_owned(),
        );
        assert_eq!(state.status, AgentStatus::Blocked);
        assert_eq!(call, 1);
    }

    #[test]
    fn run_stops_after_retry_ceiling() {
        let mut call = 0;
        let state = run(
            "agent-a",
            "",
            "do thing",
            TaskMode::Code,
            "",
            true,
            Duration::from_millis(0),
            AGENT_RETRY_LIMIT,
            |_, _| {
                call += 1;
                Ok(AgentRunResult { error: Some("stream disconnected".into()), ..Default::default() })
            },
            || Ok(vec![]),
            || Ok(()),
            |_| {},
            || "now".to_owned(),
        );
        assert_eq!(state.status, AgentStatus::Blocked);
        assert_eq!(call, AGENT_RETRY_LIMIT);
    }

    #[test]
    fn run_honors_write_preflight_failure() {
        let state = run(
            "agent-a",
            "",
            "do thing",
            TaskMode::Code,
            "",
            true,
            Duration::from_millis(0),
            AGENT_RETRY_LIMIT,
            |_, _| Ok(ok_result()),
            || Ok(vec![]),
            || Err("read-only filesystem".to_owned()),
            |_| {},
            || "now".to_owned(),
        );
        assert_eq!(state.status, AgentStatus::Blocked);
        assert!(state.blocker_reason.unwrap().starts_with("Workspace write probe failed"));
    }

    #[test]
    fn build_prompt_advisory_forbids_file_changes() {
        let prompt = build_prompt("agent-a", "topic", "analyze", TaskMode::Advisory);
        assert!(prompt.contains("Do not create, modify, or delete any file"));
    }

    #[test]
    fn run_forwards_stream_lines_into_the_log_via_summarize_event_line() {
        let state = run(
            "agent-a",
            "src",
            "do thing",
            TaskMode::Code,
            "",
            true,
            Duration::from_millis(0),
            AGENT_RETRY_LIMIT,
            |_prompt, on_line| {
                on_line(r#"{"type":"thread.started","thread_id":"t1"}"#);
                on_line(r#"{"type":"item.completed","item":{"details":{"type":"agent_message","text":"done"}}}"#);
                Ok(ok_result())
            },
            || Ok(vec![PathBuf::from("src/lib.rs")]),
            || Ok(()),
            |_| {},
            || "now".to_owned(),
        );
        assert_eq!(state.status, AgentStatus::Done);
        assert_eq!(state.log, vec!["thread started: t1".to_owned(), "done".to_owned()]);
    }
}
