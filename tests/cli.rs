// tests/cli.rs

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tractflow::cli::{CliArgs, Command, LogLevel};
use tractflow::logging::resolve_level;
use tracing::Level;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn run_subcommand_defaults() -> TestResult {
    let args = CliArgs::try_parse_from(["tractflow", "run"])?;
    assert!(args.log_level.is_none());

    let Command::Run(run) = args.command else {
        panic!("expected the run subcommand");
    };
    assert_eq!(run.pipeline, PathBuf::from("Tractflow.toml"));
    assert!(run.work_dir.is_none());
    assert!(run.exec.jobs.is_none());
    assert!(!run.exec.dry_run);
    assert!(run.exec.graph.is_none());
    Ok(())
}

#[test]
fn run_subcommand_flags() -> TestResult {
    let args = CliArgs::try_parse_from([
        "tractflow",
        "run",
        "--pipeline",
        "pipelines/dwi.toml",
        "--work-dir",
        "/scratch/tf",
        "--jobs",
        "8",
        "--dry-run",
        "--graph",
        "steps.dot",
        "--log-level",
        "debug",
    ])?;

    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    let Command::Run(run) = args.command else {
        panic!("expected the run subcommand");
    };
    assert_eq!(run.pipeline, PathBuf::from("pipelines/dwi.toml"));
    assert_eq!(run.work_dir, Some(PathBuf::from("/scratch/tf")));
    assert_eq!(run.exec.jobs, Some(8));
    assert!(run.exec.dry_run);
    assert_eq!(run.exec.graph, Some(PathBuf::from("steps.dot")));
    Ok(())
}

#[test]
fn tract_requires_its_positional_inputs() {
    assert!(CliArgs::try_parse_from(["tractflow", "tract", "/in/T1w.nii.gz"]).is_err());
}

#[test]
fn unknown_gen5tt_algorithm_is_rejected() {
    let result = CliArgs::try_parse_from([
        "tractflow", "tract", "t1", "eddy", "bvec", "bval", "tpl", "atlas", "out",
        "--gen5tt-algo", "hsvs",
    ]);
    assert!(result.is_err());
}

#[test]
fn log_level_priority() {
    assert_eq!(resolve_level(Some(LogLevel::Trace), Some("error")), Level::TRACE);
    assert_eq!(resolve_level(None, Some("warning")), Level::WARN);
    assert_eq!(resolve_level(None, Some(" DEBUG ")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("chatty")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}
