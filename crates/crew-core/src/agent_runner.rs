//! Invokes the external agent CLI as a subprocess and classifies its
//! newline-delimited JSON event stream (§4.2).

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

use serde_json::Value;

use crate::model::SandboxMode;

/// Outcome of one Agent Runner invocation. Only a failure to spawn or stream
/// is surfaced as an `Err` from [`run`]; everything else is folded into this
/// struct, including a recorded `error` field.
#[derive(Debug, Default, Clone)]
pub struct AgentRunResult {
    pub exit_code: i32,
    pub thread_id: Option<String>,
    pub last_message: String,
    pub error: Option<String>,
}

/// Parameters for one Agent Runner invocation.
pub struct RunParams<'a> {
    pub agent_cmd: &'a str,
    pub prompt: &'a str,
    pub workspace: &'a Path,
    pub last_message_path: &'a Path,
    pub sandbox_mode: SandboxMode,
    pub bypass: bool,
    pub model: Option<&'a str>,
    pub model_provider: Option<&'a str>,
}

/// Spawn the external agent CLI, stream its combined stdout/stderr line by
/// line, forward each line to `observer`, and classify its JSON events.
///
/// Stdout and stderr are merged into one combined stream (§4.2 supplement):
/// each is read on its own thread into a shared channel, and this function
/// drains that channel in arrival order, so a stderr-only event line (e.g. a
/// `turn.failed` the CLI writes to stderr) is dispatched exactly like a
/// stdout line instead of only surfacing later as a raw fallback string.
///
/// # Errors
/// Returns `Err` only when the child process fails to spawn or its stdout/
/// stderr pipes cannot be captured — never for malformed JSON lines, which
/// are silently tolerated.
pub fn run(params: &RunParams<'_>, mut observer: impl FnMut(&str)) -> std::io::Result<AgentRunResult> {
    let mut cmd = Command::new(params.agent_cmd);
    cmd.arg("exec")
        .arg("--json")
        .arg("--skip-git-repo-check")
        .arg("--output-last-message")
        .arg(params.last_message_path);

    if params.bypass {
        cmd.arg("--dangerously-bypass-approvals-and-sandbox");
    } else {
        cmd.arg("--ask-for-approval")
            .arg("never")
            .arg("--sandbox")
            .arg(params.sandbox_mode.as_flag());
    }
    if let Some(model) = params.model {
        cmd.arg("--model").arg(model);
    }
    if let Some(provider) = params.model_provider {
        cmd.arg("-c").arg(format!("model_provider={provider}"));
    }
    cmd.arg(params.prompt);
    cmd.current_dir(params.workspace);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let (tx, rx) = mpsc::channel::<String>();
    let stdout_tx = tx.clone();
    let stdout_thread = thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if stdout_tx.send(line).is_err() {
                break;
            }
        }
    });
    let stderr_thread = thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut result = AgentRunResult::default();
    for line in rx {
        observer(&line);
        dispatch_event(&line, &mut result);
    }
    let _ = stdout_thread.join();
    let _ = stderr_thread.join();

    let status = child.wait()?;
    result.exit_code = status.code().unwrap_or(-1);

    if result.last_message.is_empty()
        && let Ok(contents) = std::fs::read_to_string(params.last_message_path)
    {
        result.last_message = contents.trim().to_owned();
    }

    Ok(result)
}

fn dispatch_event(line: &str, result: &mut AgentRunResult) {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return;
    };
    let Some(event_type) = value.get("type").and_then(Value::as_str) else {
        return;
    };

    match event_type {
        "thread.started" => {
            if let Some(id) = value.get("thread_id").and_then(Value::as_str) {
                result.thread_id = Some(id.to_owned());
            }
        }
        "item.completed" => {
            if let Some(text) = value
                .pointer("/item/details/type")
                .and_then(Value::as_str)
                .filter(|t| *t == "agent_message")
                .and_then(|_| value.pointer("/item/details/text").and_then(Value::as_str))
            {
                result.last_message = text.to_owned();
            }
        }
        "turn.failed" | "error" => {
            if let Some(message) = value.get("message").and_then(Value::as_str) {
                result.error = Some(message.to_owned());
            } else {
                result.error = Some(format!("{event_type} event with no message"));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_records_thread_started() {
        let mut result = AgentRunResult::default();
        dispatch_event(r#"{"type":"thread.started","thread_id":"abc123"}"#, &mut result);
        assert_eq!(result.thread_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn dispatch_overwrites_last_message_on_agent_message() {
        let mut result = AgentRunResult::default();
        let line = r#"{"type":"item.completed","item":{"details":{"type":"agent_message","text":"done thing"}}}"#;
        dispatch_event(line, &mut result);
        assert_eq!(result.last_message, "done thing");
    }

    #[test]
    fn dispatch_ignores_command_execution_items() {
        let mut result = AgentRunResult::default();
        let line = r#"{"type":"item.completed","item":{"details":{"type":"command_execution","command":"ls"}}}"#;
        dispatch_event(line, &mut result);
        assert!(result.last_message.is_empty());
    }

    #[test]
    fn dispatch_records_turn_failed_message() {
        let mut result = AgentRunResult::default();
        dispatch_event(r#"{"type":"turn.failed","message":"connection reset"}"#, &mut result);
        assert_eq!(result.error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn dispatch_tolerates_malformed_lines() {
        let mut result = AgentRunResult::default();
        dispatch_event("not json at all {{{", &mut result);
        assert!(result.error.is_none());
        assert!(result.thread_id.is_none());
    }

    #[test]
    fn dispatch_ignores_unknown_event_types() {
        let mut result = AgentRunResult::default();
        dispatch_event(r#"{"type":"item.started"}"#, &mut result);
        assert!(result.error.is_none());
    }
}
