// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::pipeline::tractography::{
    DEFAULT_NUM_TRACTS, DEFAULT_SESSION, DEFAULT_SUBJECT, Gen5ttAlgorithm,
};

/// Command-line arguments for `tractflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tractflow",
    version,
    about = "Resumable workflow engine for diffusion tractography pipelines.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TRACTFLOW_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the steps declared in a pipeline file.
    Run(RunArgs),
    /// Run the built-in tractography workflow for one subject/session.
    Tract(TractArgs),
}

/// Options shared by every subcommand that executes a graph.
#[derive(Debug, Clone, Args)]
pub struct ExecutionArgs {
    /// Maximum number of steps running at once (default: number of CPUs).
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Print the plan (fingerprints, cache state) without executing.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the step graph in Graphviz DOT format to this file.
    #[arg(long, value_name = "PATH")]
    pub graph: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the pipeline file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Tractflow.toml")]
    pub pipeline: PathBuf,

    /// Overrides `[config].work_dir`.
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    #[command(flatten)]
    pub exec: ExecutionArgs,
}

#[derive(Debug, Clone, Args)]
pub struct TractArgs {
    pub t1_file: PathBuf,
    pub eddy_file: PathBuf,
    pub bvec_file: PathBuf,
    pub bval_file: PathBuf,
    pub template_file: PathBuf,
    pub atlas_file: PathBuf,
    pub output_dir: PathBuf,

    /// Algorithm used by 5ttgen.
    #[arg(long, value_enum, default_value_t = Gen5ttAlgorithm::Fsl)]
    pub gen5tt_algo: Gen5ttAlgorithm,

    /// The subject's aseg file; required with `--gen5tt-algo freesurfer`.
    #[arg(long, value_name = "PATH")]
    pub fs_file: Option<PathBuf>,

    /// Number of streamlines to select.
    #[arg(long, default_value_t = DEFAULT_NUM_TRACTS)]
    pub num_tracts: u32,

    /// Participant label, with or without the `sub-` prefix.
    #[arg(long, default_value = DEFAULT_SUBJECT)]
    pub participant_label: String,

    #[arg(long, default_value = DEFAULT_SESSION)]
    pub session_label: String,

    /// Mean b0 of the eddy-corrected series
    /// (default: `eddy_corrected_avg_b0.nii.gz` next to the eddy file).
    #[arg(long, value_name = "PATH")]
    pub eddy_avg_b0: Option<PathBuf>,

    /// Brain mask of the eddy-corrected series
    /// (default: `eddy_corrected_roi_mask.nii.gz` next to the eddy file).
    #[arg(long, value_name = "PATH")]
    pub eddy_mask: Option<PathBuf>,

    #[command(flatten)]
    pub exec: ExecutionArgs,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
