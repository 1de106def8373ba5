use pretty_assertions::assert_eq;
use sandcell_cell::{ExecCapture, ExecutionFailure, ExecutionOutcome};
use sandcell_classifier::RiskClassifier;
use sandcell_cli::{
    classify, command, load_config, load_inputs, log_format, render_verdict, result_exit_code,
    verdict_exit_code, write_outputs, LogFormat, EXIT_BLOCKED, EXIT_FAILED, EXIT_NEEDS_APPROVAL,
    EXIT_OK,
};
use sandcell_core::{SandcellConfig, TaskResult};
use sandcell_test_utils::{program, BLOCKED_PROGRAM, CSV_SUM_PROGRAM, NEEDS_APPROVAL_PROGRAM};
use sandcell_types::OutputArtifacts;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

fn write_program(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

// Argument parsing

#[test]
fn test_run_arguments_parse() {
    let matches = command()
        .try_get_matches_from([
            "sandcell",
            "--log-format",
            "json",
            "run",
            "task.py",
            "--input",
            "a.csv",
            "--input",
            "b.csv",
            "--output-dir",
            "out",
            "--approve",
        ])
        .unwrap();

    assert_eq!(log_format(&matches), LogFormat::Json);
    let (name, args) = matches.subcommand().unwrap();
    assert_eq!(name, "run");
    let inputs: Vec<_> = args.get_many::<PathBuf>("input").unwrap().cloned().collect();
    assert_eq!(inputs, vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]);
    assert_eq!(args.get_one::<PathBuf>("output-dir"), Some(&PathBuf::from("out")));
    assert!(args.get_flag("approve"));
}

#[test]
fn test_config_flag_is_global() {
    let matches = command()
        .try_get_matches_from(["sandcell", "classify", "task.py", "--config", "sandcell.toml"])
        .unwrap();
    assert_eq!(matches.get_one::<PathBuf>("config"), Some(&PathBuf::from("sandcell.toml")));
    assert_eq!(log_format(&matches), LogFormat::Text);
}

#[test]
fn test_subcommand_is_required() {
    assert!(command().try_get_matches_from(["sandcell"]).is_err());
    assert!(command()
        .try_get_matches_from(["sandcell", "--log-format", "xml", "check-runtime"])
        .is_err());
}

// classify

#[test]
fn test_classify_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let config = SandcellConfig::new();

    let low = write_program(&dir, "low.py", CSV_SUM_PROGRAM);
    let medium = write_program(&dir, "medium.py", NEEDS_APPROVAL_PROGRAM);
    let high = write_program(&dir, "high.py", BLOCKED_PROGRAM);

    assert_eq!(classify(&config, &low, false).unwrap(), EXIT_OK);
    assert_eq!(classify(&config, &medium, true).unwrap(), EXIT_NEEDS_APPROVAL);
    assert_eq!(classify(&config, &high, false).unwrap(), EXIT_BLOCKED);
}

#[test]
fn test_classify_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.py");
    assert!(classify(&SandcellConfig::new(), &missing, false).is_err());
}

#[test]
fn test_rendered_verdict_lists_everything() {
    let verdict = RiskClassifier::default().classify(&program("import requests\nimport json\nopen(name)"));
    let text = render_verdict(&verdict);

    assert_eq!(verdict_exit_code(&verdict), EXIT_NEEDS_APPROVAL);
    assert!(text.starts_with("risk: MEDIUM\n"));
    assert!(text.contains("flagged imports: requests\n"));
    assert!(text.contains("allowed imports: json\n"));
    assert!(text.contains("warning: 3:1: Dynamic file path in open()"));
}

// Files

#[test]
fn test_inputs_are_named_by_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(&dir, "data.csv", "name,value\na,1\n");

    let inputs = load_inputs(&[path]).unwrap();

    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].name.as_str(), "data.csv");
    assert_eq!(inputs[0].bytes, b"name,value\na,1\n");
}

#[test]
fn test_missing_input_is_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_inputs(&[dir.path().join("nope.csv")]).is_err());
}

#[test]
fn test_outputs_recreate_subdirectories() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = OutputArtifacts::from([
        ("result.csv".to_string(), b"total\n6\n".to_vec()),
        ("charts/plot.txt".to_string(), b"*".to_vec()),
    ]);

    let written = write_outputs(dir.path(), &artifacts).unwrap();

    assert_eq!(written, 2);
    assert_eq!(std::fs::read(dir.path().join("result.csv")).unwrap(), b"total\n6\n");
    assert_eq!(std::fs::read(dir.path().join("charts/plot.txt")).unwrap(), b"*");
}

#[test]
fn test_unsafe_output_names_are_skipped() {
    let parent = tempfile::tempdir().unwrap();
    let dir = parent.path().join("out");
    std::fs::create_dir(&dir).unwrap();
    let artifacts = OutputArtifacts::from([
        ("../escape.txt".to_string(), b"x".to_vec()),
        ("/abs.txt".to_string(), b"x".to_vec()),
        ("ok.txt".to_string(), b"x".to_vec()),
    ]);

    let written = write_outputs(&dir, &artifacts).unwrap();

    assert_eq!(written, 1);
    assert!(!parent.path().join("escape.txt").exists());
    assert!(dir.join("ok.txt").exists());
}

// Exit codes and configuration

#[test]
fn test_result_exit_codes() {
    let ok = ExecutionOutcome::completed(ExecCapture::exited(0), OutputArtifacts::new(), Duration::ZERO);
    let failed = ExecutionOutcome::failed(
        ExecutionFailure::NonZeroExit { status: 1 },
        Some(ExecCapture::exited(1)),
        Duration::ZERO,
    );

    assert_eq!(result_exit_code(&TaskResult::Completed { outcome: ok }), EXIT_OK);
    assert_eq!(result_exit_code(&TaskResult::Completed { outcome: failed }), EXIT_FAILED);
    assert_eq!(
        result_exit_code(&TaskResult::Blocked {
            rationale: "blocked".into(),
            flagged_imports: BTreeSet::new(),
        }),
        EXIT_BLOCKED
    );
}

#[test]
fn test_config_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sandcell.toml");
    std::fs::write(&path, "max_concurrent_cells = 7\n[cell]\nimage = \"custom:9\"\n").unwrap();

    let config = load_config(Some(path.as_path())).unwrap();

    assert_eq!(config.max_concurrent_cells, 7);
    assert!(config.cell.image == "custom:9" || std::env::var("SANDCELL_IMAGE").is_ok());
}

#[test]
fn test_invalid_config_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sandcell.toml");
    std::fs::write(&path, "max_concurrent_cells = 0\n").unwrap();

    assert!(load_config(Some(path.as_path())).is_err());
}
