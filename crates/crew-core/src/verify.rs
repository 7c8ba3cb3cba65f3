//! Three-stage post-run verification: artifact completeness, mergeability,
//! and the contract-hash check (§4.7).

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::model::{AgentState, AgentStatus, TaskMode};

/// Errors raised while standing up or tearing down the scratch merge
/// worktree (stage 2). Per-patch apply failures are not included here —
/// those are folded into [`MergeabilityResult::details`].
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    Workspace(#[from] crew_git::WorkspaceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stage 1: required-file existence per agent plus coordination-root
/// existence. In code mode, at least one agent must have produced changes.
#[must_use]
pub fn check_artifact_completeness(
    coord_root: &Path,
    agents: &[AgentState],
    task_mode: TaskMode,
) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    if !coord_root.is_dir() {
        errors.push(format!("coordination root missing: {}", coord_root.display()));
    }

    for agent in agents {
        let dir = coord_root.join(&agent.name);
        for required in ["status.json", "intent.json"] {
            if !dir.join(required).is_file() {
                errors.push(format!("{}: missing {required}", agent.name));
            }
        }
        match agent.status {
            AgentStatus::Done if !dir.join("impact-report.json").is_file() => {
                errors.push(format!("{}: missing impact-report.json", agent.name));
            }
            AgentStatus::Blocked if !dir.join("blocker.json").is_file() => {
                errors.push(format!("{}: missing blocker.json", agent.name));
            }
            _ => {}
        }
    }

    if task_mode == TaskMode::Code && !agents.iter().any(|a| !a.changed_files.is_empty()) {
        errors.push("no agent produced any file changes".to_owned());
    }

    (errors.is_empty(), errors)
}

/// One agent's non-empty diff, to be applied in plan order.
pub struct AgentPatch {
    pub name: String,
    pub patch: String,
}

/// Outcome of attempting to apply one agent's patch during mergeability.
pub struct MergeDetail {
    pub name: String,
    pub outcome: String,
    pub check_code: Option<i32>,
    pub check_stderr: Option<String>,
}

pub struct MergeabilityResult {
    pub passed: bool,
    pub merged_diff: String,
    pub details: Vec<MergeDetail>,
}

/// Stage 2: apply every non-empty patch, in plan order, to one scratch
/// detached worktree. Short-circuits entirely (no worktree created) when
/// every patch is empty.
///
/// # Errors
/// Returns an I/O error only if the scratch worktree cannot be created or
/// torn down; per-agent apply failures are reported in the result, not as
/// an `Err`.
pub fn check_mergeability(
    repo_root: &Path,
    base: &str,
    scratch_path: &Path,
    patches: &[AgentPatch],
) -> Result<MergeabilityResult, VerificationError> {
    if patches.iter().all(|p| p.patch.trim().is_empty()) {
        let details = patches
            .iter()
            .map(|p| MergeDetail {
                name: p.name.clone(),
                outcome: "skipped: empty patch".to_owned(),
                check_code: None,
                check_stderr: None,
            })
            .collect();
        return Ok(MergeabilityResult { passed: true, merged_diff: String::new(), details });
    }

    let workspace = crew_git::Workspace::create(repo_root, scratch_path, base)?;

    let mut details = Vec::new();
    let mut passed = true;

    for patch in patches {
        if patch.patch.trim().is_empty() {
            details.push(MergeDetail {
                name: patch.name.clone(),
                outcome: "skipped: empty patch".to_owned(),
                check_code: None,
                check_stderr: None,
            });
            continue;
        }

        if !passed {
            details.push(MergeDetail {
                name: patch.name.clone(),
                outcome: "skipped: prior failure".to_owned(),
                check_code: None,
                check_stderr: None,
            });
            continue;
        }

        let check = git_apply(workspace.path(), &patch.patch, true);
        match check {
            Ok((0, _)) => {
                let apply = git_apply(workspace.path(), &patch.patch, false);
                match apply {
                    Ok((0, _)) => {
                        details.push(MergeDetail {
                            name: patch.name.clone(),
                            outcome: "applied".to_owned(),
                            check_code: Some(0),
                            check_stderr: None,
                        });
                    }
                    Ok((code, stderr)) => {
                        passed = false;
                        details.push(MergeDetail {
                            name: patch.name.clone(),
                            outcome: "apply failed".to_owned(),
                            check_code: Some(code),
                            check_stderr: Some(stderr),
                        });
                    }
                    Err(e) => {
                        passed = false;
                        details.push(MergeDetail {
                            name: patch.name.clone(),
                            outcome: format!("apply error: {e}"),
                            check_code: None,
                            check_stderr: None,
                        });
                    }
                }
            }
            Ok((code, stderr)) => {
                passed = false;
                details.push(MergeDetail {
                    name: patch.name.clone(),
                    outcome: "test-apply failed".to_owned(),
                    check_code: Some(code),
                    check_stderr: Some(stderr),
                });
            }
            Err(e) => {
                passed = false;
                details.push(MergeDetail {
                    name: patch.name.clone(),
                    outcome: format!("test-apply error: {e}"),
                    check_code: None,
                    check_stderr: None,
                });
            }
        }
    }

    let merged_diff = if passed {
        workspace.diff().unwrap_or_default()
    } else {
        String::new()
    };

    workspace.destroy();

    Ok(MergeabilityResult { passed, merged_diff, details })
}

fn git_apply(dir: &Path, patch: &str, check_only: bool) -> std::io::Result<(i32, String)> {
    let patch_file = dir.join(".verify-patch.tmp");
    std::fs::write(&patch_file, patch)?;

    let mut cmd = Command::new("git");
    cmd.arg("apply");
    if check_only {
        cmd.arg("--check");
    }
    cmd.arg("--binary").arg(&patch_file).current_dir(dir);
    let output = cmd.output()?;
    let _ = std::fs::remove_file(&patch_file);
    Ok((output.status.code().unwrap_or(-1), String::from_utf8_lossy(&output.stderr).into_owned()))
}

/// True iff any changed path lies under a configured sensitive prefix,
/// triggering the contract check (stage 3).
#[must_use]
pub fn requires_contract_check(changed_paths: &[PathBuf], sensitive_prefixes: &[String]) -> bool {
    if sensitive_prefixes.is_empty() {
        return false;
    }
    changed_paths.iter().any(|p| {
        let s = p.to_string_lossy();
        sensitive_prefixes.iter().any(|prefix| s.starts_with(prefix.as_str()))
    })
}

pub struct ContractCheckResult {
    pub status: &'static str,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Stage 3: run the external contract-check program via `invoke`, which
/// returns `Err` only when the program itself could not be spawned.
pub fn run_contract_check(
    required: bool,
    invoke: impl FnOnce() -> std::io::Result<(i32, String, String)>,
) -> ContractCheckResult {
    if !required {
        return ContractCheckResult { status: "SKIPPED", exit_code: None, stdout: String::new(), stderr: String::new() };
    }
    match invoke() {
        Ok((0, stdout, stderr)) => ContractCheckResult { status: "PASS", exit_code: Some(0), stdout, stderr },
        Ok((code, stdout, stderr)) => ContractCheckResult { status: "FAIL", exit_code: Some(code), stdout, stderr },
        Err(e) => ContractCheckResult {
            status: "ERROR",
            exit_code: None,
            stdout: String::new(),
            stderr: e.to_string(),
        },
    }
}

/// Write `contract-check.json`/`contract-check.diff.txt` into `packet_dir`
/// only if not already present on disk (the external checker may have
/// written its own copy).
///
/// # Errors
/// Returns any I/O error from the write.
pub fn ensure_final_contract_files(
    packet_dir: &Path,
    run_id: &str,
    result: &ContractCheckResult,
) -> std::io::Result<()> {
    let json_path = packet_dir.join("contract-check.json");
    if !json_path.is_file() {
        let body = serde_json::json!({
            "runId": run_id,
            "status": result.status,
            "exitCode": result.exit_code,
            "stdout": result.stdout,
            "stderr": result.stderr,
        });
        std::fs::write(json_path, serde_json::to_string_pretty(&body).unwrap_or_default())?;
    }

    let diff_path = packet_dir.join("contract-check.diff.txt");
    if !diff_path.is_file() {
        let text = format!("status={}\nstdout={}\nstderr={}\n", result.status, result.stdout, result.stderr);
        std::fs::write(diff_path, text)?;
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::AgentState;

    fn done_agent(name: &str, dir: &Path) -> AgentState {
        std::fs::create_dir_all(dir.join(name)).unwrap();
        std::fs::write(dir.join(name).join("status.json"), "{}").unwrap();
        std::fs::write(dir.join(name).join("intent.json"), "{}").unwrap();
        std::fs::write(dir.join(name).join("impact-report.json"), "{}").unwrap();
        let mut agent = AgentState::new(name.to_owned(), String::new(), String::new(), PathBuf::new(), PathBuf::new());
        agent.status = AgentStatus::Done;
        agent.changed_files.push(PathBuf::from("src/lib.rs"));
        agent
    }

    #[test]
    fn artifact_completeness_passes_for_well_formed_agent() {
        let dir = tempfile::tempdir().unwrap();
        let agent = done_agent("agent-a", dir.path());
        let (ok, errors) = check_artifact_completeness(dir.path(), &[agent], TaskMode::Code);
        assert!(ok, "{errors:?}");
    }

    #[test]
    fn artifact_completeness_flags_missing_impact_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("agent-a")).unwrap();
        std::fs::write(dir.path().join("agent-a/status.json"), "{}").unwrap();
        std::fs::write(dir.path().join("agent-a/intent.json"), "{}").unwrap();
        let mut agent = AgentState::new("agent-a".into(), String::new(), String::new(), PathBuf::new(), PathBuf::new());
        agent.status = AgentStatus::Done;
        agent.changed_files.push(PathBuf::from("x"));
        let (ok, errors) = check_artifact_completeness(dir.path(), &[agent], TaskMode::Code);
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains("impact-report.json")));
    }

    #[test]
    fn artifact_completeness_requires_changes_in_code_mode() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("agent-a")).unwrap();
        std::fs::write(dir.path().join("agent-a/status.json"), "{}").unwrap();
        std::fs::write(dir.path().join("agent-a/intent.json"), "{}").unwrap();
        std::fs::write(dir.path().join("agent-a/blocker.json"), "{}").unwrap();
        let mut agent = AgentState::new("agent-a".into(), String::new(), String::new(), PathBuf::new(), PathBuf::new());
        agent.status = AgentStatus::Blocked;
        let (ok, errors) = check_artifact_completeness(dir.path(), &[agent], TaskMode::Code);
        assert!(!ok);
        assert!(errors.iter().any(|e| e.contains("no agent produced")));
    }

    fn init_repo_with_shared_file(dir: &Path) {
        let run = |args: &[&str]| {
            assert!(Command::new("git").args(args).current_dir(dir).status().unwrap().success());
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("shared.txt"), "line1\nline2\nline3\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[test]
    fn mergeability_fails_when_second_patch_conflicts_with_the_first() {
        let repo = tempfile::tempdir().unwrap();
        init_repo_with_shared_file(repo.path());

        let patch_a = "diff --git a/shared.txt b/shared.txt\n\
                        index e69de29..1111111 100644\n\
                        --- a/shared.txt\n\
                        +++ b/shared.txt\n\
                        @@ -1,3 +1,3 @@\n\
                         line1\n\
                        -line2\n\
                        +agent-a-rewrote-this\n\
                         line3\n";
        let patch_b = "diff --git a/shared.txt b/shared.txt\n\
                        index e69de29..2222222 100644\n\
                        --- a/shared.txt\n\
                        +++ b/shared.txt\n\
                        @@ -1,3 +1,3 @@\n\
                         line1\n\
                        -line2\n\
                        +agent-b-rewrote-this\n\
                         line3\n";
        let patches = vec![
            AgentPatch { name: "agent-a".into(), patch: patch_a.to_owned() },
            AgentPatch { name: "agent-b".into(), patch: patch_b.to_owned() },
        ];

        let result =
            check_mergeability(repo.path(), "HEAD", &repo.path().join("scratch"), &patches).unwrap();

        assert!(!result.passed);
        let applied = result.details.iter().find(|d| d.name == "agent-a").unwrap();
        assert_eq!(applied.outcome, "applied");
        let conflicted = result.details.iter().find(|d| d.name == "agent-b").unwrap();
        assert!(conflicted.outcome.contains("failed"));
        assert!(conflicted.check_code.is_some());
        assert!(conflicted.check_stderr.as_deref().is_some_and(|s| !s.is_empty()));
        assert!(!repo.path().join("scratch").exists());
    }

    #[test]
    fn mergeability_short_circuits_on_all_empty_patches() {
        let dir = tempfile::tempdir().unwrap();
        let patches = vec![AgentPatch { name: "a".into(), patch: String::new() }];
        let result = check_mergeability(dir.path(), "HEAD", &dir.path().join("scratch"), &patches).unwrap();
        assert!(result.passed);
        assert!(result.merged_diff.is_empty());
        assert!(!dir.path().join("scratch").exists());
    }

    #[test]
    fn requires_contract_check_matches_sensitive_prefix() {
        let changed = vec![PathBuf::from("protocol/foo.rs")];
        assert!(requires_contract_check(&changed, &["protocol".to_owned()]));
        assert!(!requires_contract_check(&changed, &["other".to_owned()]));
    }

    #[test]
    fn run_contract_check_skips_when_not_required() {
        let result = run_contract_check(false, || Ok((0, String::new(), String::new())));
        assert_eq!(result.status, "SKIPPED");
    }

    #[test]
    fn run_contract_check_errors_when_program_missing() {
        let result = run_contract_check(true, || Err(std::io::Error::other("not found")));
        assert_eq!(result.status, "ERROR");
    }

    #[test]
    fn run_contract_check_maps_nonzero_exit_to_fail() {
        let result = run_contract_check(true, || Ok((3, String::new(), "mismatch".into())));
        assert_eq!(result.status, "FAIL");
        assert_eq!(result.exit_code, Some(3));
    }

    #[test]
    fn ensure_final_contract_files_writes_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let result = ContractCheckResult { status: "PASS", exit_code: Some(0), stdout: String::new(), stderr: String::new() };
        ensure_final_contract_files(dir.path(), "run-1", &result).unwrap();
        assert!(dir.path().join("contract-check.json").is_file());
        let diff = std::fs::read_to_string(dir.path().join("contract-check.diff.txt")).unwrap();
        assert!(diff.starts_with("status=PASS"));
    }

    #[test]
    fn ensure_final_contract_files_does_not_overwrite_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("contract-check.json"), "custom").unwrap();
        let result = ContractCheckResult { status: "PASS", exit_code: Some(0), stdout: String::new(), stderr: String::new() };
        ensure_final_contract_files(dir.path(), "run-1", &result).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("contract-check.json")).unwrap(), "custom");
    }
}
