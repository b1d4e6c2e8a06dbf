// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{ParamValue, StepDescriptor};
use crate::types::{LedgerStorageMode, StagingPolicy};

/// Default work directory, relative to the pipeline file.
pub const DEFAULT_WORK_DIR: &str = ".tractflow";

/// Prefix marking an input as a reference to another step's output.
pub const STEP_REF_PREFIX: char = '@';

/// Pipeline file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// jobs = 4
/// work_dir = "work"
///
/// [step.flirt]
/// program = "flirt"
/// args = ["-in", "{inputs.in_file}", "-out", "{outputs.out_file}"]
/// inputs = { in_file = "T1w.nii.gz" }
/// outputs = { out_file = "t1_diff.nii.gz" }
///
/// [step.gen5tt]
/// program = "5ttgen"
/// args = ["fsl", "{inputs.in_file}", "{outputs.out_file}"]
/// inputs = { in_file = "@flirt.out_file" }
/// outputs = { out_file = "5TT.mif" }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub config: RawConfigSection,

    /// All steps from `[step.<id>]`.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigSection {
    /// Maximum concurrent steps; defaults to the number of CPUs.
    #[serde(default)]
    pub jobs: Option<usize>,

    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub ledger: LedgerStorageMode,

    #[serde(default)]
    pub staging: StagingPolicy,

    /// Default per-step timeout, e.g. `"2h"`.
    #[serde(default)]
    pub step_timeout: Option<String>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(DEFAULT_WORK_DIR)
}

impl Default for RawConfigSection {
    fn default() -> Self {
        Self {
            jobs: None,
            work_dir: default_work_dir(),
            ledger: LedgerStorageMode::default(),
            staging: StagingPolicy::default(),
            step_timeout: None,
        }
    }
}

/// `[step.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,

    /// Input name to either a path or `"@<step>.<output>"`.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    /// Output name to a path relative to the step's working directory.
    #[serde(default)]
    pub outputs: BTreeMap<String, PathBuf>,

    #[serde(default)]
    pub timeout: Option<String>,
}

/// Validated `[config]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSection {
    pub jobs: usize,
    pub work_dir: PathBuf,
    pub ledger: LedgerStorageMode,
    pub staging: StagingPolicy,
    pub step_timeout: Option<Duration>,
}

/// Validated pipeline file: global settings plus step descriptors.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub config: ConfigSection,
    pub steps: Vec<StepDescriptor>,
}

impl PipelineFile {
    pub(crate) fn new_unchecked(config: ConfigSection, steps: Vec<StepDescriptor>) -> Self {
        Self { config, steps }
    }
}
