//! Orchestration core: planner output parsing, scope algebra, per-agent
//! supervision, the verification pipeline, and run sequencing.
//!
//! This crate owns no subprocess or filesystem policy beyond what each
//! module documents; the `crewctl` binary wires it to a real agent CLI,
//! `crew-git` workspaces, and disk paths.

pub mod agent_runner;
pub mod classify;
pub mod json_extract;
pub mod live_state;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod scope;
pub mod supervisor;
pub mod verify;

pub use agent_runner::{AgentRunResult, RunParams};
pub use classify::{infer_task_mode, is_transient, is_write_restricted};
pub use json_extract::parse_embedded_json;
pub use live_state::{build_snapshot, summarize_event_line, write_snapshot_atomic, AgentSnapshot, PlanningEntry, Snapshot, SNAPSHOT_LOCK};
pub use model::{
    backoff_delay, truncate_chars, AgentState, AgentStatus, Plan, RunVerdict, SandboxMode, SubTask, TaskMode,
};
pub use orchestrator::{run_ticket, RunConfig, RunOutcome};
pub use planner::{build_meta_prompt, parse_plan, run_planner, PlannerOutcome, PLANNER_RETRY_LIMIT};
pub use scope::{
    canonical_scope, detect_single_file_scope, in_scope, normalize_disjoint_scopes, normalize_name,
    scopes_overlap, validate_scope_rules,
};
pub use supervisor::{build_prompt, classify_outcome, AGENT_RETRY_LIMIT};
pub use verify::{
    check_artifact_completeness, check_mergeability, ensure_final_contract_files, requires_contract_check,
    run_contract_check, AgentPatch, ContractCheckResult, MergeDetail, MergeabilityResult, VerificationError,
};
