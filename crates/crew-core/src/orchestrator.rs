//! Top-level run sequencing: fan out supervisors, tick live snapshots, join,
//! verify, and emit the evidence packet (§4.6).
//!
//! Planner invocation and agent-CLI-command resolution (§4.6 steps 1-2) are
//! the caller's responsibility (see the `crew` binary's `run` command) —
//! this module starts from an already-finalized [`Plan`] so it can be
//! exercised without a real agent CLI in tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::agent_runner::{self, RunParams};
use crate::live_state::{self, Snapshot};
use crate::model::{AgentState, AgentStatus, Plan, RunVerdict, SandboxMode, SubTask, TaskMode};
use crate::scope::validate_scope_rules;
use crate::supervisor;
use crate::verify::{
    check_artifact_completeness, check_mergeability, ensure_final_contract_files, requires_contract_check,
    run_contract_check, AgentPatch, MergeabilityResult,
};

/// Everything needed to run one ticket end to end. `plan` has already passed
/// through the planner and §4.4 normalization.
#[derive(Clone)]
pub struct RunConfig {
    pub run_id: String,
    pub task: String,
    pub task_mode: TaskMode,
    pub default_root: String,
    pub repo_root: PathBuf,
    pub merge_base: String,
    pub coord_root: PathBuf,
    pub packet_root: PathBuf,
    pub workspaces_root: PathBuf,
    pub agent_cmd: String,
    pub sandbox_mode: SandboxMode,
    pub bypass: bool,
    pub model: Option<String>,
    pub model_provider: Option<String>,
    pub agent_retry_delay: Duration,
    pub agent_retry_limit: u32,
    pub tick_period: Duration,
    pub sensitive_prefixes: Vec<String>,
    pub contract_script: Option<PathBuf>,
    pub plan: Plan,
}

pub struct RunOutcome {
    pub verdict: RunVerdict,
    pub agents: Vec<AgentState>,
    pub scope_issues: Vec<String>,
    pub artifact_errors: Vec<String>,
    pub mergeability: Option<MergeabilityResult>,
    pub contract_status: &'static str,
}

/// Run one ticket to completion, writing the full coordination/packet
/// artifact tree as a side effect.
///
/// # Errors
/// Returns an I/O error only for failures to create directories or write
/// artifacts; per-agent and per-stage failures are folded into the
/// returned [`RunOutcome`] instead.
pub fn run_ticket(config: &RunConfig) -> std::io::Result<RunOutcome> {
    tracing::info!(run_id = %config.run_id, agents = config.plan.subtasks.len(), "starting run");
    std::fs::create_dir_all(&config.coord_root)?;
    std::fs::create_dir_all(&config.packet_root)?;
    std::fs::create_dir_all(&config.workspaces_root)?;

    let (scope_ok, scope_issues) = validate_scope_rules(&config.plan.subtasks, &config.default_root);
    if !scope_ok {
        tracing::warn!(run_id = %config.run_id, ?scope_issues, "scope overlap detected");
    }
    for subtask in &config.plan.subtasks {
        seed_subtask_coordination(&config.coord_root, subtask)?;
    }

    write_tick_snapshot(config, &[], 0)?;

    let shared: Arc<Mutex<Vec<(AgentState, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    for subtask in &config.plan.subtasks {
        let handle = spawn_supervisor(config, subtask.clone(), Arc::clone(&shared));
        handles.push(handle);
    }

    let mut tick = 0u64;
    while handles.iter().any(|h| !h.is_finished()) {
        tick += 1;
        let snapshot_agents: Vec<AgentState> = shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(state, _)| state.clone())
            .collect();
        write_tick_snapshot(config, &snapshot_agents, tick)?;
        std::thread::sleep(config.tick_period);
    }
    for handle in handles {
        let _ = handle.join();
    }

    let pairs: Vec<(AgentState, String)> = Arc::try_unwrap(shared)
        .map(|m| m.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner))
        .unwrap_or_default();
    let diffs: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(state, diff)| (state.name.clone(), diff.clone()))
        .collect();
    let mut agents: Vec<AgentState> = pairs.into_iter().map(|(state, _)| state).collect();
    agents.sort_by(|a, b| a.name.cmp(&b.name));

    for agent in &agents {
        persist_agent_artifacts(&config.coord_root, agent)?;
    }

    let (artifact_ok, artifact_errors) =
        check_artifact_completeness(&config.coord_root, &agents, config.task_mode);

    let mut mergeability = None;
    let mut contract_status: &'static str = "SKIPPED";

    if config.task_mode == TaskMode::Code {
        let patches: Vec<AgentPatch> = agents
            .iter()
            .map(|a| AgentPatch { name: a.name.clone(), patch: diffs.get(&a.name).cloned().unwrap_or_default() })
            .collect();
        let scratch = config.workspaces_root.join("_scratch-merge");
        let merge_result = check_mergeability(&config.repo_root, &config.merge_base, &scratch, &patches)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let all_changed: Vec<PathBuf> = agents.iter().flat_map(|a| a.changed_files.clone()).collect();
        let required = requires_contract_check(&all_changed, &config.sensitive_prefixes);
        let contract_result = run_contract_check(required, || invoke_contract_script(config));
        contract_status = contract_result.status;
        ensure_final_contract_files(&config.packet_root, &config.run_id, &contract_result)?;

        mergeability = Some(merge_result);
    } else {
        ensure_final_contract_files(
            &config.packet_root,
            &config.run_id,
            &crate::verify::ContractCheckResult {
                status: "SKIPPED",
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            },
        )?;
    }

    let any_blocked = agents.iter().any(|a| a.status == AgentStatus::Blocked);
    let mergeability_ok = mergeability.as_ref().map_or(true, |m| m.passed);
    let verdict = if scope_ok && artifact_ok && mergeability_ok && !any_blocked {
        RunVerdict::Done
    } else {
        RunVerdict::Blocked
    };

    tracing::info!(run_id = %config.run_id, verdict = verdict.as_str(), "run finished");
    write_evidence_packet(config, &agents, &diffs, verdict, mergeability.as_ref(), contract_status)?;
    write_final_snapshot(config, &agents)?;

    for subtask in &config.plan.subtasks {
        cleanup_workspace(&config.repo_root, &config.workspaces_root.join(&subtask.name));
    }

    Ok(RunOutcome { verdict, agents, scope_issues, artifact_errors, mergeability, contract_status })
}

/// Best-effort worktree teardown, run only after the evidence packet is on
/// disk (§3's workspace-lifetime invariant).
fn cleanup_workspace(repo_root: &Path, path: &Path) {
    let succeeded = std::process::Command::new("git")
        .args(["worktree", "remove", "--force"])
        .arg(path)
        .current_dir(repo_root)
        .status()
        .is_ok_and(|status| status.success());
    if !succeeded {
        let _ = std::fs::remove_dir_all(path);
        let _ = std::process::Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(repo_root)
            .status();
    }
}

fn spawn_supervisor(
    config: &RunConfig,
    subtask: SubTask,
    shared: Arc<Mutex<Vec<(AgentState, String)>>>,
) -> JoinHandle<()> {
    let repo_root = config.repo_root.clone();
    let merge_base = config.merge_base.clone();
    let workspace_path = config.workspaces_root.join(&subtask.name);
    let agent_cmd = config.agent_cmd.clone();
    let sandbox_mode = config.sandbox_mode;
    let bypass = config.bypass;
    let model = config.model.clone();
    let model_provider = config.model_provider.clone();
    let default_root = config.default_root.clone();
    let task_mode = config.task_mode;
    let retry_delay = config.agent_retry_delay;
    let retry_limit = config.agent_retry_limit;
    let coord_root = config.coord_root.clone();

    std::thread::spawn(move || {
        let workspace = match crew_git::Workspace::create(&repo_root, &workspace_path, &merge_base) {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(agent = %subtask.name, error = %e, "workspace create failed");
                let mut state = AgentState::new(
                    subtask.name.clone(),
                    subtask.scope.clone(),
                    subtask.objective.clone(),
                    workspace_path.clone(),
                    coord_root.join(&subtask.name),
                );
                state.status = AgentStatus::Blocked;
                state.blocker_reason = Some(format!("Workspace write probe failed: {e}"));
                shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push((state, String::new()));
                return;
            }
        };

        let last_message_path = workspace.path().join(".last-message.txt");

        let mut state = supervisor::run(
            &subtask.name,
            &subtask.scope,
            &subtask.objective,
            task_mode,
            &default_root,
            task_mode == TaskMode::Code,
            retry_delay,
            retry_limit,
            |prompt, on_line: &mut dyn FnMut(&str)| {
                let params = RunParams {
                    agent_cmd: &agent_cmd,
                    prompt,
                    workspace: workspace.path(),
                    last_message_path: &last_message_path,
                    sandbox_mode,
                    bypass,
                    model: model.as_deref(),
                    model_provider: model_provider.as_deref(),
                };
                agent_runner::run(&params, |line| on_line(line))
            },
            || workspace.changed_files().map_err(|e| std::io::Error::other(e.to_string())),
            || write_preflight_probe(workspace.path()),
            |d| std::thread::sleep(d),
            now_rfc3339,
        );

        state.workspace = workspace_path.clone();
        state.coord_dir = coord_root.join(&subtask.name);
        let diff = workspace.diff().unwrap_or_default();
        // The workspace is torn down only after the evidence packet has been
        // written (see `run_ticket`'s final cleanup pass), not here — `Workspace`
        // has no `Drop` impl, so simply letting it fall out of scope is inert.

        shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push((state, diff));
    })
}

fn write_preflight_probe(workspace: &Path) -> Result<(), String> {
    let marker = workspace.join(".write-probe");
    std::fs::write(&marker, b"probe").map_err(|e| e.to_string())?;
    std::fs::remove_file(&marker).map_err(|e| e.to_string())
}

fn seed_subtask_coordination(coord_root: &Path, subtask: &SubTask) -> std::io::Result<()> {
    let dir = coord_root.join(&subtask.name);
    std::fs::create_dir_all(&dir)?;
    let intent = serde_json::json!({
        "name": subtask.name,
        "scope": subtask.scope,
        "objective": subtask.objective,
    });
    std::fs::write(dir.join("intent.json"), serde_json::to_string_pretty(&intent).unwrap_or_default())?;
    std::fs::write(dir.join("status.json"), r#"{"status":"QUEUED"}"#)?;
    Ok(())
}

fn persist_agent_artifacts(coord_root: &Path, agent: &AgentState) -> std::io::Result<()> {
    let dir = coord_root.join(&agent.name);
    std::fs::create_dir_all(&dir)?;

    let status_body = serde_json::json!({ "status": live_state_status_str(agent.status) });
    std::fs::write(dir.join("status.json"), serde_json::to_string_pretty(&status_body).unwrap_or_default())?;

    if agent.status == AgentStatus::Blocked {
        let blocker = serde_json::json!({
            "reason": agent.blocker_reason,
            "lastMessage": agent.last_message,
        });
        std::fs::write(dir.join("blocker.json"), serde_json::to_string_pretty(&blocker).unwrap_or_default())?;
        let report = serde_json::json!({ "error": agent.blocker_reason });
        std::fs::write(dir.join("impact-report.json"), serde_json::to_string_pretty(&report).unwrap_or_default())?;
    } else {
        let report = serde_json::json!({
            "changedFiles": agent.changed_files,
            "durationMs": agent.duration_ms,
            "threadId": agent.thread_id,
            "lastMessage": agent.last_message,
            "finishedAt": agent.finished_at,
        });
        std::fs::write(dir.join("impact-report.json"), serde_json::to_string_pretty(&report).unwrap_or_default())?;
    }
    Ok(())
}

fn live_state_status_str(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Queued => "QUEUED",
        AgentStatus::Running => "RUNNING",
        AgentStatus::Done => "DONE",
        AgentStatus::Blocked => "BLOCKED",
    }
}

fn invoke_contract_script(config: &RunConfig) -> std::io::Result<(i32, String, String)> {
    let Some(script) = &config.contract_script else {
        return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no contract-check script configured"));
    };
    let output = std::process::Command::new(script).arg(&config.run_id).output()?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

fn write_tick_snapshot(config: &RunConfig, agents: &[AgentState], tick: u64) -> std::io::Result<()> {
    let _guard = live_state::SNAPSHOT_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let overall = if tick == 0 { "PLANNING" } else { "RUNNING" };
    let snapshot = live_state::build_snapshot(
        &config.run_id,
        &config.task,
        task_mode_str(config.task_mode),
        &config.plan.subtasks,
        agents,
        overall,
        tick,
        &now_rfc3339(),
    );
    live_state::write_snapshot_atomic(&config.coord_root.join("live-state.json"), &snapshot)
}

fn write_final_snapshot(config: &RunConfig, agents: &[AgentState]) -> std::io::Result<()> {
    let _guard = live_state::SNAPSHOT_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut snapshot: Snapshot = live_state::build_snapshot(
        &config.run_id,
        &config.task,
        task_mode_str(config.task_mode),
        &config.plan.subtasks,
        agents,
        "DONE",
        u64::MAX,
        &now_rfc3339(),
    );
    snapshot.finished = Some(true);
    live_state::write_snapshot_atomic(&config.coord_root.join("live-state.json"), &snapshot)
}

/// Current wall-clock time as an RFC 3339 string, used for snapshot
/// timestamps and per-agent started/finished markers.
fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn task_mode_str(mode: TaskMode) -> &'static str {
    match mode {
        TaskMode::Code => "code",
        TaskMode::Advisory => "advisory",
    }
}

fn write_evidence_packet(
    config: &RunConfig,
    agents: &[AgentState],
    diffs: &std::collections::HashMap<String, String>,
    verdict: RunVerdict,
    mergeability: Option<&MergeabilityResult>,
    contract_status: &str,
) -> std::io::Result<()> {
    let diff_patch = match mergeability {
        Some(m) if m.passed && !m.merged_diff.is_empty() => m.merged_diff.clone(),
        _ => {
            let per_agent: String = agents
                .iter()
                .filter_map(|a| diffs.get(&a.name).cloned())
                .filter(|d| !d.is_empty())
                .collect();
            if per_agent.is_empty() {
                "No code changes were produced for this run.\n".to_owned()
            } else {
                per_agent
            }
        }
    };
    std::fs::write(config.packet_root.join("diff.patch"), diff_patch)?;

    let done_count = agents.iter().filter(|a| a.status == AgentStatus::Done).count();
    let blocked_count = agents.iter().filter(|a| a.status == AgentStatus::Blocked).count();
    let test_logs = format!(
        "runId={}\nverdict={}\nagents={}\ndone={}\nblocked={}\ncontract={}\n",
        config.run_id,
        verdict.as_str(),
        agents.len(),
        done_count,
        blocked_count,
        contract_status,
    );
    std::fs::write(config.packet_root.join("test-logs.txt"), test_logs)?;

    let impact_report = serde_json::json!({
        "runId": config.run_id,
        "task": config.task,
        "taskMode": task_mode_str(config.task_mode),
        "state": verdict.as_str(),
        "agents": agents.iter().map(|a| serde_json::json!({
            "name": a.name,
            "status": live_state_status_str(a.status),
            "changedFiles": a.changed_files,
            "blockerReason": a.blocker_reason,
        })).collect::<Vec<_>>(),
        "mergeability": mergeability.map(|m| serde_json::json!({
            "passed": m.passed,
            "details": m.details.iter().map(|d| serde_json::json!({
                "name": d.name,
                "outcome": d.outcome,
                "checkCode": d.check_code,
                "checkStderr": d.check_stderr,
            })).collect::<Vec<_>>(),
        })),
    });
    std::fs::write(
        config.packet_root.join("impact-report.json"),
        serde_json::to_string_pretty(&impact_report).unwrap_or_default(),
    )?;

    let summary = build_summary_md(config, agents, verdict, contract_status);
    std::fs::write(config.packet_root.join("summary.md"), summary)?;

    Ok(())
}

fn build_summary_md(config: &RunConfig, agents: &[AgentState], verdict: RunVerdict, contract_status: &str) -> String {
    let mut out = String::new();
    if verdict == RunVerdict::Done {
        out.push_str("# READY_TO_MERGE\n\n");
    } else {
        out.push_str("# BLOCKED\n\n");
    }
    out.push_str(&format!("Task: {}\n\n", config.task));

    if config.task_mode == TaskMode::Advisory {
        out.push_str("## Agent guidance\n\n");
    } else {
        out.push_str("## Agents\n\n");
    }
    for agent in agents {
        let line = match agent.status {
            AgentStatus::Done => format!("- `{}`: done ({} file(s) changed)\n", agent.name, agent.changed_files.len()),
            AgentStatus::Blocked => format!(
                "- `{}`: BLOCKED — {}\n",
                agent.name,
                agent.blocker_reason.as_deref().unwrap_or("unknown reason")
            ),
            _ => format!("- `{}`: {:?}\n", agent.name, agent.status),
        };
        out.push_str(&line);
    }
    out.push_str(&format!("\nContract check: {contract_status}\n"));
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::supervisor::AGENT_RETRY_LIMIT;

    #[test]
    fn build_summary_marks_ready_to_merge_on_done() {
        let config = RunConfig {
            run_id: "run-1".into(),
            task: "do a thing".into(),
            task_mode: TaskMode::Code,
            default_root: String::new(),
            repo_root: PathBuf::new(),
            merge_base: "HEAD".into(),
            coord_root: PathBuf::new(),
            packet_root: PathBuf::new(),
            workspaces_root: PathBuf::new(),
            agent_cmd: "agent".into(),
            sandbox_mode: SandboxMode::WorkspaceWrite,
            bypass: false,
            model: None,
            model_provider: None,
            agent_retry_delay: Duration::from_millis(0),
            agent_retry_limit: AGENT_RETRY_LIMIT,
            tick_period: Duration::from_millis(1),
            sensitive_prefixes: Vec::new(),
            contract_script: None,
            plan: Plan::default(),
        };
        let summary = build_summary_md(&config, &[], RunVerdict::Done, "SKIPPED");
        assert!(summary.starts_with("# READY_TO_MERGE"));
    }

    #[test]
    fn build_summary_marks_blocked_with_reason() {
        let config = RunConfig {
            run_id: "run-1".into(),
            task: "do a thing".into(),
            task_mode: TaskMode::Code,
            default_root: String::new(),
            repo_root: PathBuf::new(),
            merge_base: "HEAD".into(),
            coord_root: PathBuf::new(),
            packet_root: PathBuf::new(),
            workspaces_root: PathBuf::new(),
            agent_cmd: "agent".into(),
            sandbox_mode: SandboxMode::WorkspaceWrite,
            bypass: false,
            model: None,
            model_provider: None,
            agent_retry_delay: Duration::from_millis(0),
            agent_retry_limit: AGENT_RETRY_LIMIT,
            tick_period: Duration::from_millis(1),
            sensitive_prefixes: Vec::new(),
            contract_script: None,
            plan: Plan::default(),
        };
        let mut agent = AgentState::new("a".into(), String::new(), String::new(), PathBuf::new(), PathBuf::new());
        agent.status = AgentStatus::Blocked;
        agent.blocker_reason = Some("Scope violation: edited x".into());
        let summary = build_summary_md(&config, &[agent], RunVerdict::Blocked, "SKIPPED");
        assert!(summary.starts_with("# BLOCKED"));
        assert!(summary.contains("Scope violation"));
    }
}
