pub mod cassettes;
pub mod cleanup;
pub mod config;
pub mod environment;
pub mod errors;
pub mod executor;
pub mod fsm;
pub mod log_retention;
pub mod logging;
pub mod outcome;
pub mod pipeline;
pub mod report;
pub mod runtime;
pub mod source;
pub mod types;

use cassettes::BucketFixtureStore;
use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};
use config::{load_config, resolve_root, AppConfig, CliOverrides};
use environment::{render_required_list, EnvironmentValidator};
use errors::CassetteError;
use executor::ReplayExecutor;
use logging::{append_run_log, init_run_log, RUN_LOG_ENV};
use pipeline::{Collaborators, Pipeline, RunOptions};
use report::{BucketLogSink, DirectoryLogSink, LogSink, Reporter};
use runtime::{ProductionRuntime, Terminal};
use serde_json::json;
use source::Controller;
use std::path::{Path, PathBuf};
use types::{EnvMap, ProviderVariant, RunMode};

#[derive(Debug, Clone, Parser)]
#[command(name = "cassette-check")]
#[command(about = "Replay recorded VCR cassettes against a freshly cloned provider")]
pub struct Cli {
    /// Optional toml config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Provider variant to check [default: beta]
    #[arg(long, value_enum)]
    pub variant: Option<CliVariant>,
    /// Branch the cassettes were recorded on [default: main]
    #[arg(long)]
    pub fixture_branch: Option<String>,
    /// Only fetch cassettes whose name starts with this prefix.
    #[arg(long)]
    pub filter: Option<String>,
    /// Workspace root [default: $GOPATH]
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Keep harness logs in this directory instead of the log bucket.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Print the required and optional environment variables, then exit.
    #[arg(long, default_value_t = false)]
    pub list_env: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliVariant {
    Ga,
    Beta,
}

impl From<CliVariant> for ProviderVariant {
    fn from(value: CliVariant) -> Self {
        match value {
            CliVariant::Ga => ProviderVariant::Ga,
            CliVariant::Beta => ProviderVariant::Beta,
        }
    }
}

pub fn run() -> Result<i32, CassetteError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| CassetteError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &cwd, &runtime)
}

/// Runs one cassette check. Returns `Ok(0)` whenever the harness ran to
/// completion, including runs with failed tests; every fatal stage error is
/// returned as `Err`.
pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &[(std::ffi::OsString, std::ffi::OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, CassetteError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(CassetteError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        variant: cli.variant.map(Into::into),
        fixture_branch: cli.fixture_branch.clone(),
        filter: cli.filter.clone(),
        root: cli.root.clone(),
        log_dir: cli.log_dir.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    let validator = EnvironmentValidator::new(
        cfg.environment.required.iter().cloned(),
        cfg.environment.optional.iter().cloned(),
    );
    let terminal = runtime.terminal.as_ref();

    if cli.list_env {
        write_env_listing(terminal, &validator)?;
        return Ok(0);
    }

    let env_map = env_to_map(env);
    let root = resolve_root(&cfg, &env_map);
    execute_check(&cfg, &validator, &env_map, root, runtime)
}

fn execute_check(
    cfg: &AppConfig,
    validator: &EnvironmentValidator,
    env_map: &EnvMap,
    root: Option<PathBuf>,
    runtime: &ProductionRuntime,
) -> Result<i32, CassetteError> {
    let fs = runtime.file_system.as_ref();
    let runner = runtime.process_runner.as_ref();
    let terminal = runtime.terminal.as_ref();

    let mut pipeline = Pipeline::new(fs);
    let inputs = pipeline.validate(
        validator,
        (
            cfg.environment.credential.as_str(),
            cfg.environment.credential_fallback.as_str(),
        ),
        env_map,
    )?;
    let Some(root) = root else {
        return Err(pipeline.abort(CassetteError::InvalidConfig(
            "no workspace root: pass --root or set GOPATH".to_string(),
        )));
    };

    let (run_log, budget) = run_log_target(env_map, &root, cfg.logs.budget_bytes);
    init_run_log(run_log, budget);
    append_run_log(
        "info",
        "run.started",
        json!({
            "variant": cfg.run.variant.as_str(),
            "fixture_branch": cfg.cassettes.branch,
            "filter": cfg.cassettes.filter,
            "root": root.display().to_string(),
            "log_dir": cfg.logs.directory.as_ref().map(|d| d.display().to_string())
        }),
    );
    for name in inputs.environment.missing_optional() {
        let warning = format!("did not provide optional {name} environment variable");
        if let Err(error) = terminal.write_error_line(&warning) {
            append_run_log(
                "warn",
                "run.terminal.write_failed",
                json!({ "line": warning, "error": error.to_string() }),
            );
        }
    }

    let mode = RunMode::Replaying;
    let variant = cfg.run.variant;
    let log_path = root
        .join("testlogs")
        .join(format!("{}-{}", mode.as_str(), variant.as_str()));

    let fixtures = BucketFixtureStore::new(runner, fs, cfg.cassettes.bucket.as_str(), &root);
    let source = Controller::new(
        runner,
        &root,
        cfg.source.owner.as_str(),
        inputs.credential.clone(),
    );
    let harness = ReplayExecutor::new(
        runner,
        fs,
        cfg.harness.settings(),
        inputs.environment.clone(),
    );
    let sink: Box<dyn LogSink + '_> = match &cfg.logs.directory {
        Some(dir) => Box::new(DirectoryLogSink::new(fs, dir, inputs.commit.as_str())),
        None => Box::new(BucketLogSink::new(
            runner,
            fs,
            cfg.logs.bucket.as_str(),
            inputs.commit.as_str(),
            log_path.join("upload"),
        )),
    };
    let reporter = Reporter::new(fs, sink.as_ref(), &log_path);

    let collab = Collaborators {
        fixtures: &fixtures,
        source: &source,
        harness: &harness,
        reporter: &reporter,
        terminal,
    };
    let options = RunOptions {
        mode,
        variant,
        fixture_branch: cfg.cassettes.branch.clone(),
        filter: cfg.cassettes.filter.clone(),
        log_path,
    };

    let report = pipeline.execute(&inputs, &options, &collab)?;
    terminal.write_line(&format!("logs: {}", report.log_location))?;
    append_run_log(
        "info",
        "run.completed",
        json!({
            "state": report.final_state.as_str(),
            "passed": report.outcomes.passed().len(),
            "failed": report.outcomes.failed().len(),
            "skipped": report.outcomes.skipped().len(),
            "cleanup_error": report.cleanup_error.as_ref().map(|e| e.to_string())
        }),
    );
    Ok(0)
}

fn write_env_listing(
    terminal: &dyn Terminal,
    validator: &EnvironmentValidator,
) -> Result<(), CassetteError> {
    terminal.write_line("required environment variables:")?;
    for line in render_required_list(validator.required()).lines() {
        terminal.write_line(line)?;
    }
    terminal.write_line("optional environment variables:")?;
    for line in render_required_list(validator.optional()).lines() {
        terminal.write_line(line)?;
    }
    Ok(())
}

/// Run log path and its pruning budget. An overridden path may share its
/// directory with anything, so it is never pruned.
fn run_log_target(env: &EnvMap, root: &Path, budget_bytes: u64) -> (PathBuf, Option<u64>) {
    match env.get(RUN_LOG_ENV) {
        Some(path) if !path.trim().is_empty() => (PathBuf::from(path), None),
        _ => (
            root.join(".cache").join("cassette-check").join("run.jsonl"),
            Some(budget_bytes),
        ),
    }
}

pub fn render_help() -> String {
    let mut cmd = Cli::command();
    cmd.render_long_help().to_string()
}

fn env_to_map(env: &[(std::ffi::OsString, std::ffi::OsString)]) -> EnvMap {
    let mut map = EnvMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}
