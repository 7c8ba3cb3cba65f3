//! `inspect RUN_ID` — root-cause summary for a completed run (§4.9).

use std::path::Path;

use anyhow::Result;
use serde_json::Value;

use crate::config::OrchestratorConfig;

/// Print a root-cause summary for `run_id` and return the process exit code:
/// `0` iff the run's final `impact-report.json` state is `DONE`, `1` if the
/// packet is missing or unreadable.
pub fn run(config: &OrchestratorConfig, repo_root: &Path, run_id: &str) -> Result<i32> {
    let artifact_root = repo_root.join(&config.run.artifact_root);
    let packet_dir = artifact_root.join("pr-packets").join(run_id);
    let coord_dir = artifact_root.join("coordination").join(run_id);

    let impact_path = packet_dir.join("impact-report.json");
    let impact_text = match std::fs::read_to_string(&impact_path) {
        Ok(text) => text,
        Err(e) => {
            println!("no readable evidence packet for run '{run_id}': {e}");
            return Ok(1);
        }
    };
    let Ok(impact) = serde_json::from_str::<Value>(&impact_text) else {
        println!("impact-report.json for run '{run_id}' is not valid JSON");
        return Ok(1);
    };

    let state = impact.get("state").and_then(Value::as_str).unwrap_or("UNKNOWN");
    println!("run {run_id}: {state}");
    println!("task: {}", impact.get("task").and_then(Value::as_str).unwrap_or(""));

    if let Some(agents) = impact.get("agents").and_then(Value::as_array) {
        println!();
        println!("agents:");
        for agent in agents {
            let name = agent.get("name").and_then(Value::as_str).unwrap_or("?");
            let status = agent.get("status").and_then(Value::as_str).unwrap_or("?");
            println!("  {name}: {status}");
            if status != "BLOCKED" {
                continue;
            }
            if let Some(reason) = agent.get("blockerReason").and_then(Value::as_str) {
                println!("    blockerReason: {reason}");
            }
            print_blocker_last_message(&coord_dir, name);
        }
    }

    print_mergeability_section(&impact);
    print_contract_status(&packet_dir);

    if state != "DONE" {
        println!();
        println!("see also:");
        for name in [
            "summary.md",
            "contract-check.json",
            "contract-check.diff.txt",
            "impact-report.json",
        ] {
            println!("  {}", packet_dir.join(name).display());
        }
        println!("  {}", coord_dir.join("planner").join("intent.json").display());
    }

    Ok(i32::from(state != "DONE"))
}

fn print_blocker_last_message(coord_dir: &Path, agent_name: &str) {
    let blocker_path = coord_dir.join(agent_name).join("blocker.json");
    let Ok(text) = std::fs::read_to_string(&blocker_path) else { return };
    let Ok(blocker) = serde_json::from_str::<Value>(&text) else { return };
    let Some(last_message) = blocker.get("lastMessage").and_then(Value::as_str) else { return };
    for line in last_message.lines().take(3) {
        println!("    | {line}");
    }
}

fn print_mergeability_section(impact: &Value) {
    let Some(mergeability) = impact.get("mergeability").filter(|v| !v.is_null()) else { return };
    let passed = mergeability.get("passed").and_then(Value::as_bool).unwrap_or(true);
    if passed {
        return;
    }
    println!();
    println!("mergeability: FAILED");
    let Some(details) = mergeability.get("details").and_then(Value::as_array) else { return };
    for detail in details {
        let name = detail.get("name").and_then(Value::as_str).unwrap_or("?");
        let outcome = detail.get("outcome").and_then(Value::as_str).unwrap_or("?");
        println!("  {name}: {outcome}");
        if let Some(code) = detail.get("checkCode").and_then(Value::as_i64) {
            println!("    checkCode: {code}");
        }
        if let Some(stderr) = detail.get("checkStderr").and_then(Value::as_str) {
            let truncated = crew_core::truncate_chars(stderr, 320);
            println!("    checkStderr: {truncated}");
        }
    }
}

fn print_contract_status(packet_dir: &Path) {
    let Ok(text) = std::fs::read_to_string(packet_dir.join("contract-check.json")) else { return };
    let Ok(contract) = serde_json::from_str::<Value>(&text) else { return };
    println!();
    println!(
        "contract check: {}",
        contract.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN")
    );
    if let Some(code) = contract.get("exitCode").and_then(Value::as_i64) {
        println!("  exitCode: {code}");
    }
}
