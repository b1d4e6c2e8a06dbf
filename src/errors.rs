// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GraphError`]: build-time problems with the step graph. Fatal, nothing
//!   is executed.
//! - [`InputUnavailable`]: an external input could not be read while
//!   fingerprinting. Contained to the step and its dependents.
//! - [`ExecutionError`]: a step was attempted and did not produce a valid
//!   result. Contained to the step and its dependents.
//! - [`LedgerError`]: the run ledger could not be read or written. Fatal.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::dag::StepId;

/// Reasons the Graph Builder rejects a set of step descriptors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline contains no steps")]
    EmptyPipeline,

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(StepId),

    #[error("step '{step}' references its own output through input '{input}'")]
    SelfReference { step: StepId, input: String },

    #[error("step '{step}' input '{input}' references unknown {target}")]
    DanglingReference {
        step: StepId,
        input: String,
        target: String,
    },

    #[error("cycle detected in step graph involving step '{step}'")]
    CyclicDependency { step: StepId },

    #[error("step '{step}' declares output '{output}' more than once")]
    DuplicateOutput { step: StepId, output: String },

    #[error("step '{step}' declares input '{input}' more than once")]
    DuplicateInput { step: StepId, input: String },

    #[error("step '{step}' output '{output}' has invalid path {path:?} (must be relative, stay inside the working directory and avoid engine-managed files)")]
    InvalidOutputPath {
        step: StepId,
        output: String,
        path: PathBuf,
    },

    #[error("step '{step}' parameter '{param}' is invalid: {reason}")]
    InvalidParameter {
        step: StepId,
        param: String,
        reason: String,
    },

    #[error("step '{step}' command uses unknown placeholder '{placeholder}'")]
    UnknownPlaceholder { step: StepId, placeholder: String },
}

impl GraphError {
    /// The step the error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            GraphError::EmptyPipeline => None,
            GraphError::DuplicateStepId(step)
            | GraphError::SelfReference { step, .. }
            | GraphError::DanglingReference { step, .. }
            | GraphError::CyclicDependency { step }
            | GraphError::DuplicateOutput { step, .. }
            | GraphError::DuplicateInput { step, .. }
            | GraphError::InvalidOutputPath { step, .. }
            | GraphError::InvalidParameter { step, .. }
            | GraphError::UnknownPlaceholder { step, .. } => Some(step),
        }
    }
}

/// An external input was missing or unreadable at fingerprint time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("step '{step}' input '{input}' is unavailable at {path:?}: {reason}")]
pub struct InputUnavailable {
    pub step: StepId,
    pub input: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Per-step execution failures.
///
/// IO details are flattened to strings so the error can be cloned into the
/// run report and compared in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("could not prepare working directory: {0}")]
    Workdir(String),

    #[error("could not stage input '{input}': {reason}")]
    Staging { input: String, reason: String },

    #[error("could not start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("command exited with status {code}")]
    NonZeroExit { code: i32 },

    #[error("declared output '{output}' missing or empty at {path:?}")]
    MissingOutput { output: String, path: PathBuf },

    #[error("command timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("could not commit outputs: {0}")]
    Commit(String),

    #[error("run interrupted while the step was running")]
    Interrupted,
}

impl ExecutionError {
    /// Whether this failure belongs in the run ledger.
    ///
    /// Interrupted steps never reached a terminal state and are simply
    /// retried on the next invocation.
    pub fn is_recordable(&self) -> bool {
        !matches!(self, ExecutionError::Interrupted)
    }
}

/// Infrastructure errors from the run ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt ledger record at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("could not serialize ledger record for step '{step}': {reason}")]
    Serialize { step: StepId, reason: String },

    #[error("ledger lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum TractflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid step graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Run ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TractflowError>;
