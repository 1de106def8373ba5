//! Sandcell developer harness
//!
//! `sandcell classify`, `sandcell run` and `sandcell check-runtime`. The
//! binary is a thin wrapper over [`command`] and [`dispatch`].

#![warn(unreachable_pub)]
#![allow(missing_docs)]

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use sandcell_cell::IsolatedExecutionCell;
use sandcell_classifier::{RiskClassifier, RiskTier, RiskVerdict};
use sandcell_core::{SandcellConfig, TaskOrchestrator, TaskResult};
use sandcell_types::{InputArtifact, OutputArtifacts, ProgramText};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

/// Completed successfully, or classified LOW
pub const EXIT_OK: u8 = 0;
/// Ran and failed, or the harness itself failed
pub const EXIT_FAILED: u8 = 1;
/// Classified HIGH
pub const EXIT_BLOCKED: u8 = 2;
/// Classified MEDIUM and not approved
pub const EXIT_NEEDS_APPROVAL: u8 = 3;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// The argument parser
#[must_use]
pub fn command() -> Command {
    Command::new("sandcell")
        .version(sandcell_core::VERSION)
        .about("Classify and run untrusted Python programs in throwaway containers")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format (logs go to stderr; filter with RUST_LOG)"),
        )
        .subcommand(
            Command::new("classify")
                .about("Classify a program without running it")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Python source file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the verdict as JSON"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Classify a program and run it if allowed")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Python source file"),
                )
                .arg(
                    Arg::new("input")
                        .long("input")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("File to stage into the input root (repeatable)"),
                )
                .arg(
                    Arg::new("output-dir")
                        .long("output-dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory to write output artifacts to"),
                )
                .arg(
                    Arg::new("approve")
                        .long("approve")
                        .action(ArgAction::SetTrue)
                        .help("Approve a program that needs approval and run it"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the task result as JSON"),
                ),
        )
        .subcommand(
            Command::new("check-runtime").about("Check the container runtime and executor image"),
        )
}

/// Log format chosen on the command line
#[must_use]
pub fn log_format(matches: &ArgMatches) -> LogFormat {
    match matches.get_one::<String>("log-format").map(String::as_str) {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

/// Install the global subscriber, writing to stderr
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Configuration from `path`, or defaults plus environment overrides
///
/// # Errors
/// Fails if the file cannot be loaded or the configuration is invalid
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SandcellConfig> {
    if let Some(path) = path {
        return SandcellConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let mut config = SandcellConfig::new();
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Read a program from disk
///
/// # Errors
/// Fails if the file cannot be read or is not UTF-8
pub fn read_program(path: &Path) -> anyhow::Result<ProgramText> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(ProgramText::from(text))
}

/// Read input files, naming each by its file name
///
/// # Errors
/// Fails if a file cannot be read or its name is not a valid artifact name
pub fn load_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<InputArtifact>> {
    paths
        .iter()
        .map(|path| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                bail!("{} has no usable file name", path.display());
            };
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            InputArtifact::named(name, bytes).with_context(|| format!("input {}", path.display()))
        })
        .collect()
}

/// Write harvested artifacts under `dir`, recreating subdirectories
///
/// Names that are not plain relative paths are skipped.
///
/// # Errors
/// Fails if a directory or file cannot be written
pub fn write_outputs(dir: &Path, artifacts: &OutputArtifacts) -> anyhow::Result<usize> {
    let mut written = 0;
    for (name, bytes) in artifacts {
        let relative = Path::new(name);
        let plain = relative.components().next().is_some()
            && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            tracing::warn!(artifact = %name, "skipping artifact with unsafe name");
            continue;
        }
        let target = dir.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&target, bytes).with_context(|| format!("writing {}", target.display()))?;
        written += 1;
    }
    Ok(written)
}

/// Exit code for a verdict
#[must_use]
pub fn verdict_exit_code(verdict: &RiskVerdict) -> u8 {
    match verdict.risk_tier() {
        RiskTier::Low => EXIT_OK,
        RiskTier::Medium => EXIT_NEEDS_APPROVAL,
        RiskTier::High => EXIT_BLOCKED,
    }
}

/// Exit code for a task result
#[must_use]
pub fn result_exit_code(result: &TaskResult) -> u8 {
    match result {
        TaskResult::Blocked { .. } => EXIT_BLOCKED,
        TaskResult::NeedsApproval { .. } => EXIT_NEEDS_APPROVAL,
        TaskResult::Completed { outcome } if outcome.succeeded => EXIT_OK,
        TaskResult::Completed { .. } => EXIT_FAILED,
    }
}

/// Human-readable verdict
#[must_use]
pub fn render_verdict(verdict: &RiskVerdict) -> String {
    let join = |set: &std::collections::BTreeSet<String>| set.iter().map(String::as_str).collect::<Vec<_>>().join(", ");

    let mut out = String::new();
    let _ = writeln!(out, "risk: {}", verdict.risk_tier().name().to_uppercase());
    if let Some(rationale) = verdict.rationale() {
        let _ = writeln!(out, "rationale: {rationale}");
    }
    if !verdict.flagged_imports().is_empty() {
        let _ = writeln!(out, "flagged imports: {}", join(verdict.flagged_imports()));
    }
    if !verdict.allowed_imports().is_empty() {
        let _ = writeln!(out, "allowed imports: {}", join(verdict.allowed_imports()));
    }
    for diagnostic in verdict.diagnostics() {
        let _ = writeln!(out, "warning: {diagnostic}");
    }
    out
}

/// Run the chosen subcommand and return the process exit code
///
/// # Errors
/// Fails on configuration, I/O or container runtime errors
pub async fn dispatch(matches: &ArgMatches) -> anyhow::Result<u8> {
    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("classify", args)) => {
            let file = required_path(args, "file")?;
            classify(&config, &file, args.get_flag("json"))
        }
        Some(("run", args)) => {
            let file = required_path(args, "file")?;
            let inputs: Vec<PathBuf> = args
                .get_many::<PathBuf>("input")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            let output_dir = args.get_one::<PathBuf>("output-dir").cloned();
            run(
                config,
                &file,
                &inputs,
                output_dir.as_deref(),
                args.get_flag("approve"),
                args.get_flag("json"),
            )
            .await
        }
        Some(("check-runtime", _)) => check_runtime(config).await,
        _ => bail!("no subcommand given"),
    }
}

fn required_path(args: &ArgMatches, name: &str) -> anyhow::Result<PathBuf> {
    args.get_one::<PathBuf>(name)
        .cloned()
        .with_context(|| format!("missing <{name}>"))
}

/// `sandcell classify`
///
/// # Errors
/// Fails if the classifier cannot be built or the file cannot be read
pub fn classify(config: &SandcellConfig, file: &Path, json: bool) -> anyhow::Result<u8> {
    let classifier = RiskClassifier::new(&config.classifier, config.roots.clone())?;
    let program = read_program(file)?;
    let verdict = classifier.classify(&program);

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print!("{}", render_verdict(&verdict));
    }
    Ok(verdict_exit_code(&verdict))
}

async fn run(
    config: SandcellConfig,
    file: &Path,
    input_paths: &[PathBuf],
    output_dir: Option<&Path>,
    approve: bool,
    json: bool,
) -> anyhow::Result<u8> {
    let program = read_program(file)?;
    let inputs = load_inputs(input_paths)?;
    let orchestrator = TaskOrchestrator::from_config(config)
        .await
        .context("starting orchestrator")?;

    let mut result = orchestrator.execute(program.clone(), inputs.clone()).await?;
    if approve {
        if let Some(grant) = result.grant().cloned() {
            tracing::info!(flagged = ?grant.flagged_imports(), "approved on the command line");
            result = orchestrator.execute_approved(program, inputs, &grant).await?;
        }
    }

    if let (Some(dir), Some(outcome)) = (output_dir, result.outcome()) {
        let written = write_outputs(dir, &outcome.output_artifacts)?;
        tracing::info!(dir = %dir.display(), written, "output artifacts written");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        report(&result);
    }
    Ok(result_exit_code(&result))
}

fn report(result: &TaskResult) {
    match result {
        TaskResult::Blocked { rationale, .. } => eprintln!("blocked: {rationale}"),
        TaskResult::NeedsApproval {
            rationale,
            code_preview,
            ..
        } => {
            eprintln!("needs approval: {rationale}");
            eprintln!("--- program ---\n{code_preview}\n---------------");
            eprintln!("re-run with --approve to execute it");
        }
        TaskResult::Completed { outcome } => {
            print!("{}", outcome.standard_output);
            eprint!("{}", outcome.standard_error);
            eprintln!(
                "exit status {} after {}ms, {} output artifact(s)",
                outcome.exit_status,
                outcome.elapsed.as_millis(),
                outcome.output_artifacts.len()
            );
        }
    }
}

async fn check_runtime(config: SandcellConfig) -> anyhow::Result<u8> {
    let cell = IsolatedExecutionCell::docker(config.cell, config.roots)
        .await
        .context("container runtime check failed")?;
    let live = cell.live_cells().await?;
    println!(
        "runtime ok: '{}' answers, image '{}' present, {} managed cell(s) running",
        cell.config().docker_binary,
        cell.config().image,
        live.len()
    );
    Ok(EXIT_OK)
}
