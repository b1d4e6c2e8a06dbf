// src/dag/node_state.rs

//! Per-node run state and dispatched-step types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::dag::descriptor::{StepDescriptor, StepId};
use crate::errors::{ExecutionError, InputUnavailable};
use crate::fingerprint::Fingerprint;

/// Status of a step within one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    /// Waiting on upstream steps.
    Pending,
    /// Every upstream step succeeded; waiting for a worker slot.
    Ready,
    /// Dispatched (ledger lookup or execution in progress).
    Running,
    Succeeded,
    Failed,
    /// Never attempted; see [`SkipReason`].
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a step was never attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A direct producer failed.
    UpstreamFailed(StepId),
    /// A direct producer was itself skipped.
    UpstreamSkipped(StepId),
    /// One of the step's own external inputs is missing or unreadable.
    InputUnavailable(InputUnavailable),
    /// A producer could not be fingerprinted because of a missing input.
    UpstreamUnavailable(StepId),
    /// A producer succeeded without reporting where one of its outputs is.
    UpstreamOutputUnknown { step: StepId, output: String },
    /// The run was cancelled before the step was dispatched.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed(step) => write!(f, "upstream step '{step}' failed"),
            SkipReason::UpstreamSkipped(step) => write!(f, "upstream step '{step}' was skipped"),
            SkipReason::InputUnavailable(err) => {
                write!(f, "input '{}' unavailable at {:?}: {}", err.input, err.path, err.reason)
            }
            SkipReason::UpstreamUnavailable(step) => {
                write!(f, "upstream step '{step}' has unavailable inputs")
            }
            SkipReason::UpstreamOutputUnknown { step, output } => {
                write!(f, "location of output '{output}' of upstream step '{step}' is unknown")
            }
            SkipReason::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Scheduler bookkeeping for one step.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub id: StepId,
    pub status: StepStatus,
    pub fingerprint: Option<Fingerprint>,
    /// Distinct producer steps.
    pub deps: Vec<StepId>,
    pub skip_reason: Option<SkipReason>,
    pub failure: Option<ExecutionError>,
    /// Committed output locations, once succeeded.
    pub outputs: BTreeMap<String, PathBuf>,
    /// Succeeded from a ledger hit without invoking the command.
    pub cached: bool,
}

impl NodeState {
    pub fn new(id: StepId, deps: Vec<StepId>, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            id,
            status: StepStatus::Pending,
            fingerprint,
            deps,
            skip_reason: None,
            failure: None,
            outputs: BTreeMap::new(),
            cached: false,
        }
    }

    /// Whether the external command was actually invoked for this node.
    pub fn executed(&self) -> bool {
        match self.status {
            StepStatus::Succeeded => !self.cached,
            StepStatus::Failed => true,
            _ => false,
        }
    }
}

/// A step the scheduler wants started now.
#[derive(Debug, Clone)]
pub struct ScheduledStep {
    pub id: StepId,
    pub fingerprint: Fingerprint,
    pub descriptor: StepDescriptor,
    /// Concrete location of every declared input (external path or
    /// committed upstream output).
    pub inputs: BTreeMap<String, PathBuf>,
}
