// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod fs;
pub mod ledger;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod workdir;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, ExecutionArgs, RunArgs, TractArgs};
use crate::config::loader::load_and_validate;
use crate::dag::StepDescriptor;
use crate::engine::pipeline::{EXIT_GRAPH_ERROR, EXIT_OK};
use crate::engine::{Engine, EngineOptions, PipelineOutcome, Plan, RunReport};
use crate::errors::{Result, TractflowError};
use crate::exec::ProcessInvoker;
use crate::ledger::{open_ledger, RunLedger};
use crate::pipeline::{build_steps, publish, TractParams};
use crate::types::{LedgerStorageMode, StagingPolicy};

/// Scratch/ledger directory of the `tract` command, under the output dir.
pub const TRACT_WORK_DIR: &str = "scratch";
const DEFAULT_EDDY_AVG_B0: &str = "eddy_corrected_avg_b0.nii.gz";
const DEFAULT_EDDY_MASK: &str = "eddy_corrected_roi_mask.nii.gz";

/// High-level entry point used by `main.rs`.
///
/// Returns the process exit code: 0 when every step succeeded, 2 on a
/// partial failure, 3 when the step graph was rejected. Configuration,
/// ledger and IO problems are returned as `Err`.
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Run(run_args) => run_pipeline_file(run_args).await,
        Command::Tract(tract_args) => run_tract(tract_args).await,
    }
}

async fn run_pipeline_file(args: RunArgs) -> Result<i32> {
    let pipeline = match load_and_validate(&args.pipeline) {
        Ok(pipeline) => pipeline,
        Err(TractflowError::Graph(err)) => {
            eprintln!("tractflow: invalid step graph: {err}");
            return Ok(EXIT_GRAPH_ERROR);
        }
        Err(err) => return Err(err),
    };

    let cfg = pipeline.config;
    let options = EngineOptions {
        jobs: resolve_jobs(args.exec.jobs, cfg.jobs)?,
        work_dir: args.work_dir.unwrap_or(cfg.work_dir),
        staging: cfg.staging,
        default_timeout: cfg.step_timeout,
    };

    let execution = execute(pipeline.steps, options, cfg.ledger, &args.exec).await?;
    Ok(execution.exit_code)
}

async fn run_tract(args: TractArgs) -> Result<i32> {
    let params = tract_params(&args);
    let steps = build_steps(&params)?;

    let options = EngineOptions {
        jobs: resolve_jobs(args.exec.jobs, engine::default_jobs())?,
        work_dir: args.output_dir.join(TRACT_WORK_DIR),
        staging: StagingPolicy::default(),
        default_timeout: None,
    };

    let execution = execute(steps, options, LedgerStorageMode::File, &args.exec).await?;
    if let Some(report) = &execution.report {
        let summary = publish(report, &params, &args.output_dir)?;
        if !summary.missing.is_empty() {
            warn!(missing = ?summary.missing, "some final outputs were not produced");
        }
    }

    Ok(execution.exit_code)
}

/// Translate the `tract` arguments into workflow parameters.
pub fn tract_params(args: &TractArgs) -> TractParams {
    let sibling = |name: &str| -> PathBuf {
        match args.eddy_file.parent() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    };

    TractParams {
        subject: strip_label(&args.participant_label, "sub-"),
        session: strip_label(&args.session_label, "ses-"),
        t1: args.t1_file.clone(),
        eddy: args.eddy_file.clone(),
        eddy_avg_b0: args
            .eddy_avg_b0
            .clone()
            .unwrap_or_else(|| sibling(DEFAULT_EDDY_AVG_B0)),
        eddy_mask: args
            .eddy_mask
            .clone()
            .unwrap_or_else(|| sibling(DEFAULT_EDDY_MASK)),
        bvec: args.bvec_file.clone(),
        bval: args.bval_file.clone(),
        template: args.template_file.clone(),
        atlas: args.atlas_file.clone(),
        gen5tt: args.gen5tt_algo,
        fs_file: args.fs_file.clone(),
        num_tracts: args.num_tracts,
    }
}

fn strip_label(label: &str, prefix: &str) -> String {
    label.strip_prefix(prefix).unwrap_or(label).to_string()
}

fn resolve_jobs(cli: Option<usize>, fallback: usize) -> Result<usize> {
    match cli {
        Some(0) => Err(TractflowError::ConfigError(
            "--jobs must be >= 1 (got 0)".to_string(),
        )),
        Some(n) => Ok(n),
        None => Ok(fallback),
    }
}

/// What `execute` produced; `report` is absent for dry runs and rejected
/// graphs.
struct Execution {
    exit_code: i32,
    report: Option<RunReport>,
}

impl Execution {
    fn without_report(exit_code: i32) -> Self {
        Self {
            exit_code,
            report: None,
        }
    }
}

/// Plan, optionally write the DOT graph, then dry-run or execute.
async fn execute(
    steps: Vec<StepDescriptor>,
    options: EngineOptions,
    ledger_mode: LedgerStorageMode,
    exec: &ExecutionArgs,
) -> Result<Execution> {
    let ledger = open_ledger(ledger_mode, &options.work_dir)?;
    let engine = Engine::new(options, ledger, Arc::new(ProcessInvoker::new()));

    let plan = match engine.plan(steps) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("tractflow: invalid step graph: {err}");
            return Ok(Execution::without_report(
                PipelineOutcome::GraphError(err).exit_code(),
            ));
        }
    };

    if let Some(path) = &exec.graph {
        write_dot(&plan, path)?;
    }

    if exec.dry_run {
        print_dry_run(&plan, engine.ledger().as_ref())?;
        return Ok(Execution::without_report(EXIT_OK));
    }

    info!(
        steps = plan.graph.len(),
        jobs = engine.options().jobs,
        work_dir = %engine.options().work_dir.display(),
        "starting pipeline"
    );

    let report = engine.run_plan(plan, shutdown_signal()).await?;
    print!("{report}");

    let outcome = PipelineOutcome::Completed(report);
    Ok(Execution {
        exit_code: outcome.exit_code(),
        report: outcome.report().cloned(),
    })
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run simply
/// cannot be interrupted gracefully.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received; stopping dispatch and killing running steps");
}

fn write_dot(plan: &Plan, path: &Path) -> Result<()> {
    std::fs::write(path, plan.graph.to_dot())?;
    info!(path = %path.display(), "wrote step graph");
    Ok(())
}

/// Print steps in topological order with their fingerprint and cache state.
fn print_dry_run(plan: &Plan, ledger: &dyn RunLedger) -> Result<()> {
    println!("tractflow dry-run");
    println!("steps ({}):", plan.graph.len());

    for planned in plan.describe(ledger)? {
        let state = match (&planned.unavailable, planned.cached) {
            (Some(reason), _) => format!("unavailable: {reason}"),
            (None, true) => "cached".to_string(),
            (None, false) => "will run".to_string(),
        };
        let fingerprint = planned
            .fingerprint
            .as_ref()
            .map(|fp| fp.short().to_string())
            .unwrap_or_else(|| "-".to_string());

        println!("  - {} [{fingerprint}] {state}", planned.id);
        if let Some(step) = plan.graph.descriptor(&planned.id) {
            println!("      cmd: {} {}", step.command.program, step.command.args.join(" "));
            let deps = plan.graph.dependencies_of(&planned.id);
            if !deps.is_empty() {
                println!("      after: {:?}", deps);
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
