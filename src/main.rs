//! `crewctl` — multi-agent task orchestrator CLI.
//!
//! Wires [`crew_core`]'s planner/supervisor/verification pipeline to a real
//! agent CLI subprocess, `crew-git` workspaces, disk paths, and the
//! TUI/HTTP dashboards. See `crew_core::orchestrator` for the run sequence
//! this binary assembles and drives.

mod config;
mod demo;
mod error;
mod http;
mod inspect;
mod telemetry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use config::OrchestratorConfig;
use crew_core::{
    detect_single_file_scope, infer_task_mode, run_planner, run_ticket, AgentRunResult, Plan, RunConfig as CoreRunConfig,
    RunParams, SandboxMode, SubTask, TaskMode,
};
use error::OrchestratorError;

/// Multi-agent task orchestrator.
///
/// crewctl decomposes a task into a handful of independent sub-tasks, runs
/// one coding agent per sub-task in its own isolated git workspace, and
/// verifies the combined result — artifact completeness, mergeability, and
/// an optional contract check — before declaring it ready to merge.
#[derive(Parser)]
#[command(name = "crew")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and run one ticket end to end.
    Run {
        /// The task description. May be omitted in `--ui web` mode, where
        /// it is instead supplied via `POST /api/start`.
        task: Option<String>,
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run a built-in demo prompt (same flags as `run`, minus the task).
    Demo {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print a root-cause summary for a completed run.
    Inspect {
        /// The run id, e.g. `run-2026-07-27-141230`.
        run_id: String,
    },

    /// Emit a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Dashboard used to drive and observe a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Ui {
    Tui,
    Web,
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Alias for the positional task argument, for scripting convenience.
    #[arg(long)]
    prompt: Option<String>,

    #[arg(long = "run-id")]
    run_id: Option<String>,

    /// Dashboard to drive the run.
    #[arg(long, value_enum, default_value_t = Ui::Tui)]
    ui: Ui,

    #[arg(long = "agent-sandbox")]
    agent_sandbox: Option<String>,

    #[arg(long = "task-mode")]
    task_mode: Option<String>,

    #[arg(long = "bypass-approvals-and-sandbox")]
    bypass_approvals_and_sandbox: bool,

    #[arg(long)]
    model: Option<String>,

    #[arg(long = "model-provider")]
    model_provider: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let _telemetry_guard = telemetry::init();
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run { task, common } => {
            let task = task.or(common.prompt.clone()).unwrap_or_default();
            run_command(task, &common)?
        }
        Commands::Demo { common } => run_command(demo::DEMO_TASK.to_owned(), &common)?,
        Commands::Inspect { run_id } => inspect::run(&load_config()?, &std::env::current_dir()?, &run_id)?,
        Commands::Completions { shell } => {
            emit_completions(shell);
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn emit_completions(shell: clap_complete::Shell) {
    let mut cmd = <Cli as clap::CommandFactory>::command();
    let name = cmd.get_name().to_owned();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}

fn load_config() -> Result<OrchestratorConfig> {
    let path = Path::new(".orchestrator/config.toml");
    Ok(OrchestratorConfig::load(path)?.apply_env_overrides())
}

/// Run one ticket end to end: resolve config and the agent CLI, pick a
/// dashboard, plan (or short-circuit per §4.4), execute, and report the exit
/// code per §6 ("0 on success or non-BLOCKED; 1 on BLOCKED or setup failure").
fn run_command(task: String, common: &CommonArgs) -> Result<i32> {
    let config = load_config()?;
    let repo_root = std::env::current_dir().context("failed to read current directory")?;
    if !repo_root.join(".git").exists() {
        bail!(OrchestratorError::NotAGitRepo { path: repo_root });
    }

    let run_id = match &common.run_id {
        Some(id) => {
            validate_run_id(id)?;
            id.clone()
        }
        None => generate_run_id(),
    };

    let agent_cmd = resolve_agent_cli(config.agent.cli_bin.as_deref());
    let sandbox_mode = common
        .agent_sandbox
        .as_deref()
        .map(SandboxMode::normalize)
        .unwrap_or_else(|| config.agent.sandbox());
    let bypass = common.bypass_approvals_and_sandbox || config.agent.bypass;
    let model = common.model.clone().or_else(|| config.agent.model.clone());
    let model_provider = common.model_provider.clone().or_else(|| config.agent.model_provider.clone());
    let requested_mode = common
        .task_mode
        .as_deref()
        .map(|raw| match raw {
            "code" => TaskMode::Code,
            "advisory" => TaskMode::Advisory,
            _ => infer_task_mode(&task, None),
        })
        .or_else(|| config.agent.task_mode.requested());

    let template = RunTemplate {
        repo_root: repo_root.clone(),
        default_root: config.run.default_root.clone(),
        agent_cmd,
        sandbox_mode,
        bypass,
        model,
        model_provider,
        requested_mode,
        artifact_root: repo_root.join(&config.run.artifact_root),
        agent_retry_delay: Duration::from_secs(config.run.agent_retry_delay_seconds),
        agent_retry_limit: config.run.agent_retry_limit,
        planner_retry_limit: config.run.planner_retry_limit,
        tick_period: dashboard_tick_period(common.ui, &config),
        sensitive_prefixes: config.contract.sensitive_prefixes.clone(),
        contract_script: config.contract.script.clone(),
    };

    match common.ui {
        Ui::Web => {
            let port = common.port.unwrap_or(config.dashboard.port);
            http::serve(template, task, run_id, port)
        }
        Ui::Tui => {
            let run_config = template.build(task, run_id)?;
            let snapshot_path = run_config.coord_root.join("live-state.json");
            let tick_period = run_config.tick_period;
            let handle = std::thread::spawn(move || run_ticket(&run_config));
            crew_tui::run(snapshot_path, tick_period)?;
            let outcome = handle.join().map_err(|_| anyhow::anyhow!("orchestrator thread panicked"))??;
            Ok(i32::from(outcome.verdict == crew_core::RunVerdict::Blocked))
        }
    }
}

/// Everything needed to build a [`CoreRunConfig`] once a task is known.
/// Split out from `run_command` so the web dashboard can defer planning
/// until a task arrives via `POST /api/start` (§4.8).
struct RunTemplate {
    repo_root: PathBuf,
    default_root: String,
    agent_cmd: String,
    sandbox_mode: SandboxMode,
    bypass: bool,
    model: Option<String>,
    model_provider: Option<String>,
    requested_mode: Option<TaskMode>,
    artifact_root: PathBuf,
    agent_retry_delay: Duration,
    agent_retry_limit: u32,
    planner_retry_limit: u32,
    tick_period: Duration,
    sensitive_prefixes: Vec<String>,
    contract_script: Option<PathBuf>,
}

impl RunTemplate {
    fn build(&self, task: String, run_id: String) -> Result<CoreRunConfig> {
        let coord_root = self.artifact_root.join("coordination").join(&run_id);
        let packet_root = self.artifact_root.join("pr-packets").join(&run_id);
        let workspaces_root = self.artifact_root.join("workspaces").join(&run_id);
        std::fs::create_dir_all(&coord_root).map_err(|e| OrchestratorError::ArtifactRootUnwritable {
            path: self.artifact_root.clone(),
            detail: e.to_string(),
        })?;

        let task_mode = if task.is_empty() && self.requested_mode.is_none() {
            TaskMode::Code
        } else {
            infer_task_mode(&task, self.requested_mode)
        };

        let plan = resolve_plan(
            &task,
            task_mode,
            &self.default_root,
            &coord_root,
            &self.agent_cmd,
            self.sandbox_mode,
            self.bypass,
            self.model.as_deref(),
            self.model_provider.as_deref(),
            self.planner_retry_limit,
        )?;

        Ok(CoreRunConfig {
            run_id,
            task,
            task_mode,
            default_root: self.default_root.clone(),
            repo_root: self.repo_root.clone(),
            merge_base: "HEAD".to_owned(),
            coord_root,
            packet_root,
            workspaces_root,
            agent_cmd: self.agent_cmd.clone(),
            sandbox_mode: self.sandbox_mode,
            bypass: self.bypass,
            model: self.model.clone(),
            model_provider: self.model_provider.clone(),
            agent_retry_delay: self.agent_retry_delay,
            agent_retry_limit: self.agent_retry_limit,
            tick_period: self.tick_period,
            sensitive_prefixes: self.sensitive_prefixes.clone(),
            contract_script: self.contract_script.clone(),
            plan,
        })
    }
}

fn dashboard_tick_period(ui: Ui, config: &OrchestratorConfig) -> Duration {
    match ui {
        Ui::Web => Duration::from_millis(config.dashboard.web_period_ms),
        Ui::Tui => Duration::from_millis(config.dashboard.tui_period_ms),
    }
}

/// Run the planner (unless the §4.4 single-file directive short-circuits
/// it) and persist its artifacts under `coord_root/planner/`.
#[allow(clippy::too_many_arguments)]
fn resolve_plan(
    task: &str,
    task_mode: TaskMode,
    default_root: &str,
    coord_root: &Path,
    agent_cmd: &str,
    sandbox_mode: SandboxMode,
    bypass: bool,
    model: Option<&str>,
    model_provider: Option<&str>,
    planner_retry_limit: u32,
) -> Result<Plan> {
    let planner_dir = coord_root.join("planner");
    std::fs::create_dir_all(&planner_dir)?;

    if task_mode == TaskMode::Code
        && let Some(path) = detect_single_file_scope(task)
    {
        let plan = Plan {
            subtasks: vec![SubTask {
                name: "agent-single-file".to_owned(),
                scope: path,
                objective: task.to_owned(),
            }],
        };
        std::fs::write(planner_dir.join("status.json"), r#"{"status":"SHORT_CIRCUITED"}"#)?;
        std::fs::write(
            planner_dir.join("intent.json"),
            serde_json::to_string_pretty(&plan).unwrap_or_default(),
        )?;
        return Ok(plan);
    }

    let planner_sandbox = if task_mode == TaskMode::Advisory { SandboxMode::ReadOnly } else { sandbox_mode };
    let last_message_path = planner_dir.join("last-message.txt");

    let outcome = run_planner(task, task_mode, default_root, planner_retry_limit, |prompt| {
        let params = RunParams {
            agent_cmd,
            prompt,
            workspace: coord_root,
            last_message_path: &last_message_path,
            sandbox_mode: planner_sandbox,
            bypass,
            model,
            model_provider,
        };
        let result: AgentRunResult = crew_core::agent_runner::run(&params, |_line| {})?;
        Ok((result.exit_code, result.last_message))
    })?;

    let status = if outcome.fallback_used { "FALLBACK" } else { "DONE" };
    std::fs::write(
        planner_dir.join("status.json"),
        serde_json::json!({ "status": status, "attempts": outcome.parse_attempts, "exitCode": outcome.exit_code })
            .to_string(),
    )?;
    std::fs::write(
        planner_dir.join("intent.json"),
        serde_json::to_string_pretty(&outcome.plan).unwrap_or_default(),
    )?;
    std::fs::write(
        planner_dir.join("impact-report.json"),
        serde_json::json!({ "fallbackUsed": outcome.fallback_used, "subtasks": outcome.plan.subtasks.len() })
            .to_string(),
    )?;
    std::fs::write(planner_dir.join("last-message.txt"), &outcome.raw_output)?;

    Ok(outcome.plan)
}

/// Resolve the agent CLI command per §4.6 step 1: explicit override (already
/// folded into `cli_bin` via config's environment overlay), else a PATH
/// lookup, else known local build outputs (honoring `AGENT_TARGET_DIR` /
/// `CARGO_TARGET_DIR`), else the bare command name, left for the OS to
/// resolve or fail on spawn.
fn resolve_agent_cli(cli_bin: Option<&str>) -> String {
    const BARE_NAME: &str = "codex";

    if let Some(explicit) = cli_bin {
        return explicit.to_owned();
    }
    if which_on_path(BARE_NAME).is_some() {
        return BARE_NAME.to_owned();
    }
    let target_dir = std::env::var("AGENT_TARGET_DIR")
        .or_else(|_| std::env::var("CARGO_TARGET_DIR"))
        .unwrap_or_else(|_| "target".to_owned());
    for profile in ["release", "debug"] {
        let candidate = Path::new(&target_dir).join(profile).join(BARE_NAME);
        if candidate.is_file() {
            return candidate.to_string_lossy().into_owned();
        }
    }
    BARE_NAME.to_owned()
}

fn which_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(name)).find(|p| p.is_file())
}

fn generate_run_id() -> String {
    format!("run-{}", chrono::Utc::now().format("%Y-%m-%d-%H%M%S"))
}

fn validate_run_id(run_id: &str) -> Result<()> {
    let Some(rest) = run_id.strip_prefix("run-") else {
        bail!(OrchestratorError::InvalidRunId { run_id: run_id.to_owned() });
    };
    let bytes = rest.as_bytes();
    let valid = bytes.len() == 17
        && bytes
            .iter()
            .enumerate()
            .all(|(i, &b)| if matches!(i, 4 | 7 | 10) { b == b'-' } else { b.is_ascii_digit() });
    if valid {
        Ok(())
    } else {
        bail!(OrchestratorError::InvalidRunId { run_id: run_id.to_owned() });
    }
}
