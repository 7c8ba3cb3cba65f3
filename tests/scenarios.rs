//! End-to-end scenario fragments (§8 S1-S6) against a fixture git repo and a
//! stub agent CLI, so the suite never depends on a real coding-agent binary.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crew_core::{AgentStatus, Plan, RunConfig, RunVerdict, SandboxMode, SubTask, TaskMode};

fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo(dir: &Path) {
    run_git(dir, &["init", "-q"]);
    run_git(dir, &["config", "user.email", "test@example.com"]);
    run_git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("README.md"), "hello\n").expect("write README");
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-q", "-m", "init"]);
}

/// A stub `codex`-shaped agent CLI: accepts the real flag set, ignores all
/// of it except `--output-last-message`, and inspects the flattened prompt
/// (the last positional argument) for a small marker vocabulary so each test
/// can script exactly what the "agent" does without a real model call.
fn write_stub_agent(dir: &Path) -> PathBuf {
    let script = dir.join("stub-agent.sh");
    std::fs::write(
        &script,
        r#"#!/bin/sh
out_path=""
prompt=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output-last-message) out_path="$2"; shift 2 ;;
    *) prompt="$1"; shift ;;
  esac
done

flat=$(printf '%s' "$prompt" | tr '\n' ' ')
message="Done."

case "$flat" in
  *CREATE_FILE:*)
    file=$(printf '%s' "$flat" | sed -n 's/.*CREATE_FILE:\([^ ]*\).*/\1/p')
    dir=$(dirname "$file")
    [ "$dir" != "." ] && mkdir -p "$dir"
    printf 'generated content\n' > "$file"
    message="Created $file as requested."
    ;;
  *SIMULATE_WRITE_REJECTED*)
    message="All write attempts were rejected."
    ;;
  *SET_LINE2:*)
    spec=$(printf '%s' "$flat" | sed -n 's/.*SET_LINE2:\([^ ]*\).*/\1/p')
    file=${spec%%=*}
    token=${spec#*=}
    printf 'line1\n%s\nline3\n' "$token" > "$file"
    message="Updated $file"
    ;;
esac

[ -n "$out_path" ] && printf '%s' "$message" > "$out_path"
printf '{"type":"thread.started","thread_id":"stub-thread"}\n'
printf '{"type":"item.completed","item":{"details":{"type":"agent_message","text":"%s"}}}\n' "$message"
exit 0
"#,
    )
    .expect("write stub agent script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&script).expect("stat stub agent").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod stub agent");
    }
    script
}

fn base_config(repo_root: PathBuf, agent_cmd: PathBuf, plan: Plan, task: &str, task_mode: TaskMode) -> RunConfig {
    let run_id = "run-scenario-test".to_owned();
    let artifact_root = repo_root.join(".orchestrator-artifacts");
    RunConfig {
        run_id: run_id.clone(),
        task: task.to_owned(),
        task_mode,
        default_root: String::new(),
        repo_root,
        merge_base: "HEAD".to_owned(),
        coord_root: artifact_root.join("coordination").join(&run_id),
        packet_root: artifact_root.join("pr-packets").join(&run_id),
        workspaces_root: artifact_root.join("workspaces").join(&run_id),
        agent_cmd: agent_cmd.to_string_lossy().into_owned(),
        sandbox_mode: SandboxMode::WorkspaceWrite,
        bypass: true,
        model: None,
        model_provider: None,
        agent_retry_delay: Duration::from_millis(1),
        agent_retry_limit: crew_core::AGENT_RETRY_LIMIT,
        tick_period: Duration::from_millis(5),
        sensitive_prefixes: vec!["codex-rs/protocol".to_owned()],
        contract_script: None,
        plan,
    }
}

/// S3: a single-file directive bypasses the planner upstream (the binary
/// crate's job); here we exercise the resulting one-subtask plan straight
/// through `run_ticket` and confirm the agent lands DONE with exactly the
/// file it was told to create.
#[test]
fn s3_single_file_directive_produces_one_done_agent() {
    let repo = tempfile::tempdir().expect("tempdir");
    init_repo(repo.path());
    let agent = write_stub_agent(repo.path());

    let plan = Plan {
        subtasks: vec![SubTask {
            name: "agent-single-file".to_owned(),
            scope: "foo/bar.txt".to_owned(),
            objective: "CREATE_FILE:foo/bar.txt create exactly one file foo/bar.txt".to_owned(),
        }],
    };
    let config = base_config(
        repo.path().to_path_buf(),
        agent,
        plan,
        "create exactly one file foo/bar.txt",
        TaskMode::Code,
    );

    let outcome = crew_core::run_ticket(&config).expect("run_ticket");
    assert_eq!(outcome.verdict, RunVerdict::Done);
    assert_eq!(outcome.agents.len(), 1);
    assert_eq!(outcome.agents[0].status, AgentStatus::Done);
    assert_eq!(outcome.agents[0].changed_files, vec![PathBuf::from("foo/bar.txt")]);

    let summary = std::fs::read_to_string(config.packet_root.join("summary.md")).expect("read summary");
    assert!(summary.starts_with("# READY_TO_MERGE"));
}

/// S4: the agent exits cleanly but its last message signals a platform write
/// restriction; the per-agent outcome must be BLOCKED with that specific
/// reason, and the overall run must be BLOCKED too.
#[test]
fn s4_write_restriction_blocks_the_agent() {
    let repo = tempfile::tempdir().expect("tempdir");
    init_repo(repo.path());
    let agent = write_stub_agent(repo.path());

    let plan = Plan {
        subtasks: vec![SubTask {
            name: "agent-a".to_owned(),
            scope: "src".to_owned(),
            objective: "SIMULATE_WRITE_REJECTED please edit src".to_owned(),
        }],
    };
    let config = base_config(repo.path().to_path_buf(), agent, plan, "edit src", TaskMode::Code);

    let outcome = crew_core::run_ticket(&config).expect("run_ticket");
    assert_eq!(outcome.verdict, RunVerdict::Blocked);
    assert_eq!(outcome.agents[0].status, AgentStatus::Blocked);
    assert_eq!(
        outcome.agents[0].blocker_reason.as_deref(),
        Some("Platform write restriction detected from agent output.")
    );
}

/// S1: an advisory task produces no file changes, skips mergeability, and
/// is recorded DONE with an "Agent guidance" summary section.
#[test]
fn s1_advisory_task_skips_mergeability_and_succeeds() {
    let repo = tempfile::tempdir().expect("tempdir");
    init_repo(repo.path());
    let agent = write_stub_agent(repo.path());

    let plan = Plan {
        subtasks: vec![SubTask {
            name: "agent-advisory".to_owned(),
            scope: String::new(),
            objective: "Outline a phased plan.".to_owned(),
        }],
    };
    let task = "Give me a checklist to plan this project in phases.";
    let config = base_config(repo.path().to_path_buf(), agent, plan, task, TaskMode::Advisory);

    let outcome = crew_core::run_ticket(&config).expect("run_ticket");
    assert_eq!(outcome.verdict, RunVerdict::Done);
    assert!(outcome.mergeability.is_none());
    assert_eq!(outcome.contract_status, "SKIPPED");

    let summary = std::fs::read_to_string(config.packet_root.join("summary.md")).expect("read summary");
    assert!(summary.contains("## Agent guidance"));
}

/// S6: two agents each rewrite the same line of a file that already exists
/// at the merge base. Both patches apply cleanly in isolation, but the
/// second fails once applied on top of the first's already-merged change —
/// the run must come back BLOCKED with `mergeability.passed == false` and a
/// per-agent apply-failure detail carrying a check code and stderr.
#[test]
fn s6_mergeability_conflict_blocks_the_run() {
    let repo = tempfile::tempdir().expect("tempdir");
    init_repo(repo.path());
    std::fs::write(repo.path().join("shared.txt"), "line1\nline2\nline3\n").expect("write shared.txt");
    run_git(repo.path(), &["add", "shared.txt"]);
    run_git(repo.path(), &["commit", "-q", "-m", "add shared file"]);
    let agent = write_stub_agent(repo.path());

    let plan = Plan {
        subtasks: vec![
            SubTask {
                name: "agent-a".to_owned(),
                scope: String::new(),
                objective: "SET_LINE2:shared.txt=agent-a-rewrote-this edit shared file".to_owned(),
            },
            SubTask {
                name: "agent-b".to_owned(),
                scope: String::new(),
                objective: "SET_LINE2:shared.txt=agent-b-rewrote-this edit shared file".to_owned(),
            },
        ],
    };
    let config = base_config(repo.path().to_path_buf(), agent, plan, "edit the shared file", TaskMode::Code);

    let outcome = crew_core::run_ticket(&config).expect("run_ticket");
    assert_eq!(outcome.verdict, RunVerdict::Blocked);
    assert!(outcome.agents.iter().all(|a| a.status == AgentStatus::Done));

    let mergeability = outcome.mergeability.expect("mergeability result");
    assert!(!mergeability.passed);

    let conflicting = mergeability
        .details
        .iter()
        .find(|d| d.name == "agent-b")
        .expect("agent-b merge detail present");
    assert!(conflicting.outcome.contains("failed"), "unexpected outcome: {}", conflicting.outcome);
    assert!(conflicting.check_code.is_some());
    assert!(conflicting.check_stderr.as_deref().is_some_and(|s| !s.is_empty()));

    let applied = mergeability.details.iter().find(|d| d.name == "agent-a").expect("agent-a merge detail present");
    assert_eq!(applied.outcome, "applied");
}
