//! Calls the agent CLI with a meta-prompt and converts its free-form output
//! into a disjoint [`Plan`] (§4.5).

use serde_json::Value;

use crate::json_extract::parse_embedded_json;
use crate::model::{Plan, SubTask, TaskMode};
use crate::scope::{normalize_disjoint_scopes, normalize_name};

pub const PLANNER_RETRY_LIMIT: u32 = 2;

const CODE_FALLBACK_NAME: &str = "agent-implementation";
const CODE_FALLBACK_SCOPE: &str = "";
const ADVISORY_FALLBACK_NAME: &str = "agent-advisor";
const ADVISORY_FALLBACK_SCOPE: &str = "analysis";

/// Build the mode-specific meta-prompt that demands a strict JSON
/// `subtasks` array of 2-4 `{name, scope, objective}` items.
#[must_use]
pub fn build_meta_prompt(task: &str, mode: TaskMode, retry_nudge: bool) -> String {
    let mode_clause = match mode {
        TaskMode::Code => {
            "Decompose this coding task into 2 to 4 independent sub-tasks whose file \
             scopes do not overlap. Each sub-task will be executed by a separate coding \
             agent in its own isolated workspace."
        }
        TaskMode::Advisory => {
            "Decompose this advisory task into 2 to 4 independent topics for analysis. \
             No sub-task may produce file changes."
        }
    };

    let mut prompt = format!(
        "{mode_clause}\n\n\
         Task: {task}\n\n\
         Respond with STRICT JSON only, no markdown code fences, no commentary. \
         Top-level shape: {{\"subtasks\": [{{\"name\": string, \"scope\": string, \
         \"objective\": string}}, ...]}}. `name` must match [a-z][a-z0-9_-]{{0,47}} and be \
         unique. `scope` must be a path-like prefix (empty means the whole repository) and \
         scopes across sub-tasks must not overlap or be prefixes of one another."
    );
    if retry_nudge {
        prompt.push_str(
            "\n\nYour previous output was not valid: it did not contain a parseable \
             `subtasks` array. Respond again with ONLY the JSON object described above.",
        );
    }
    prompt
}

fn fallback_plan(mode: TaskMode) -> Plan {
    let (name, scope) = match mode {
        TaskMode::Code => (CODE_FALLBACK_NAME, CODE_FALLBACK_SCOPE),
        TaskMode::Advisory => (ADVISORY_FALLBACK_NAME, ADVISORY_FALLBACK_SCOPE),
    };
    Plan {
        subtasks: vec![SubTask {
            name: name.to_owned(),
            scope: scope.to_owned(),
            objective: "Carry out the full task.".to_owned(),
        }],
    }
}

fn is_trivial_fallback(plan: &Plan, mode: TaskMode) -> bool {
    if plan.subtasks.len() != 1 {
        return false;
    }
    let (name, scope) = match mode {
        TaskMode::Code => (CODE_FALLBACK_NAME, CODE_FALLBACK_SCOPE),
        TaskMode::Advisory => (ADVISORY_FALLBACK_NAME, ADVISORY_FALLBACK_SCOPE),
    };
    plan.subtasks[0].name == name && plan.subtasks[0].scope == scope
}

/// Convert an extracted JSON value into a [`Plan`], recognizing any of the
/// keys `subtasks`, `agents`, `tasks`, `steps`, `items`, `plan` (also nested
/// inside `normalizedPlan`), or a single bare subtask object. Falls back to
/// the trivial single-agent plan when nothing recognizable is found.
#[must_use]
pub fn parse_plan(value: Option<&Value>, mode: TaskMode) -> Plan {
    let Some(value) = value else {
        return fallback_plan(mode);
    };

    let array = find_subtask_array(value).or_else(|| single_subtask_object(value).map(|s| vec![s]));

    let Some(items) = array else {
        return fallback_plan(mode);
    };

    let mut subtasks = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        if let Some(sub) = extract_subtask(item, idx) {
            subtasks.push(sub);
        }
    }

    if subtasks.is_empty() {
        return fallback_plan(mode);
    }

    // De-duplicate names by suffixing repeats, matching §3's uniqueness
    // invariant without discarding any sub-task.
    let mut seen = std::collections::HashSet::new();
    for (idx, sub) in subtasks.iter_mut().enumerate() {
        sub.name = normalize_name(&sub.name);
        if sub.name.is_empty() {
            sub.name = format!("agent-{idx}");
        }
        let mut candidate = sub.name.clone();
        let mut k = 1;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{}-{k}", sub.name);
            k += 1;
        }
        sub.name = candidate;
    }

    Plan { subtasks }
}

fn find_subtask_array(value: &Value) -> Option<Vec<Value>> {
    const KEYS: &[&str] = &["subtasks", "agents", "tasks", "steps", "items", "plan"];
    if let Value::Object(map) = value {
        for key in KEYS {
            if let Some(Value::Array(arr)) = map.get(*key) {
                return Some(arr.clone());
            }
        }
        if let Some(nested) = map.get("normalizedPlan") {
            return find_subtask_array(nested);
        }
    }
    if let Value::Array(arr) = value {
        return Some(arr.clone());
    }
    None
}

fn single_subtask_object(value: &Value) -> Option<Value> {
    let Value::Object(map) = value else { return None };
    let has_name_like = map.contains_key("name") || map.contains_key("task") || map.contains_key("goal");
    let has_scope_like = map.contains_key("scope") || map.contains_key("fileScope");
    if has_name_like && has_scope_like {
        Some(value.clone())
    } else {
        None
    }
}

fn extract_subtask(item: &Value, idx: usize) -> Option<SubTask> {
    let Value::Object(map) = item else { return None };
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("agent-{idx}"));
    let scope = map
        .get("scope")
        .or_else(|| map.get("fileScope"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();
    let objective = map
        .get("objective")
        .or_else(|| map.get("task"))
        .or_else(|| map.get("goal"))
        .or_else(|| map.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned();
    Some(SubTask { name, scope, objective })
}

/// Result of running the planner: the final normalized plan plus bookkeeping
/// persisted into `intent.json` (§4.5 step 7).
pub struct PlannerOutcome {
    pub plan: Plan,
    pub raw_output: String,
    pub parse_attempts: u32,
    pub fallback_used: bool,
    pub exit_code: i32,
}

/// Run the planner to completion: invoke, extract, and — if the result
/// collapses to the trivial fallback — retry up to `retry_limit` (defaulting
/// to [`PLANNER_RETRY_LIMIT`], configurable via `.orchestrator/config.toml`'s
/// `run.planner_retry_limit`) total attempts with an explicit nudge, then
/// normalize for disjointness.
pub fn run_planner(
    task: &str,
    mode: TaskMode,
    default_root: &str,
    retry_limit: u32,
    mut invoke: impl FnMut(&str) -> std::io::Result<(i32, String)>,
) -> std::io::Result<PlannerOutcome> {
    let mut attempts = 0u32;
    let mut last_output = String::new();
    let mut last_exit = 0;
    let mut plan = fallback_plan(mode);
    let mut fallback_used = true;

    while attempts < retry_limit {
        attempts += 1;
        let prompt = build_meta_prompt(task, mode, attempts > 1);
        let (exit_code, output) = invoke(&prompt)?;
        last_exit = exit_code;
        last_output = output.clone();

        let extracted = parse_embedded_json(&output);
        plan = parse_plan(extracted.as_ref(), mode);

        if !is_trivial_fallback(&plan, mode) {
            fallback_used = false;
            break;
        }
    }

    let scopes = normalize_disjoint_scopes(&plan.subtasks, default_root);
    for (sub, scope) in plan.subtasks.iter_mut().zip(scopes) {
        sub.scope = scope;
    }

    if fallback_used {
        tracing::warn!(attempts, "planner fell back to the trivial single-agent plan");
    }

    Ok(PlannerOutcome {
        plan,
        raw_output: last_output,
        parse_attempts: attempts,
        fallback_used,
        exit_code: last_exit,
    })
}
