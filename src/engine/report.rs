// src/engine/report.rs

//! Aggregate result of a pipeline run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::dag::{Scheduler, SkipReason, StepId, StepStatus};
use crate::errors::ExecutionError;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    AllSucceeded,
    /// At least one step failed or was skipped.
    PartialFailure,
}

/// Final state of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub id: StepId,
    pub status: StepStatus,
    pub fingerprint: Option<Fingerprint>,
    /// The external command was invoked in this run.
    pub executed: bool,
    /// Satisfied from the ledger.
    pub cached: bool,
    pub outputs: BTreeMap<String, PathBuf>,
    pub failure: Option<ExecutionError>,
    pub skip_reason: Option<SkipReason>,
}

/// Per-step results in topological order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn from_scheduler(scheduler: &Scheduler) -> Self {
        let steps = scheduler
            .nodes()
            .map(|node| StepReport {
                id: node.id.clone(),
                status: node.status,
                fingerprint: node.fingerprint.clone(),
                executed: node.executed(),
                cached: node.cached,
                outputs: node.outputs.clone(),
                failure: node.failure.clone(),
                skip_reason: node.skip_reason.clone(),
            })
            .collect();

        Self {
            steps,
            cancelled: scheduler.is_cancelled(),
        }
    }

    pub fn status(&self) -> RunStatus {
        if self
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Succeeded)
        {
            RunStatus::AllSucceeded
        } else {
            RunStatus::PartialFailure
        }
    }

    pub fn step(&self, id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<StepStatus> {
        self.step(id).map(|s| s.status)
    }

    /// Steps that were attempted and failed.
    pub fn failed(&self) -> Vec<&StepReport> {
        self.with_status(StepStatus::Failed)
    }

    /// Steps that were never attempted.
    pub fn skipped(&self) -> Vec<&StepReport> {
        self.with_status(StepStatus::Skipped)
    }

    /// Ids of steps whose command ran in this run.
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.executed)
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Ids of steps satisfied from the ledger.
    pub fn cached(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.cached)
            .map(|s| s.id.as_str())
            .collect()
    }

    fn with_status(&self, status: StepStatus) -> Vec<&StepReport> {
        self.steps.iter().filter(|s| s.status == status).collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let succeeded = self.with_status(StepStatus::Succeeded).len();
        writeln!(
            f,
            "{} steps: {} succeeded ({} executed, {} cached), {} failed, {} skipped",
            self.steps.len(),
            succeeded,
            self.executed().len() - self.failed().len(),
            self.cached().len(),
            self.failed().len(),
            self.skipped().len(),
        )?;

        if self.cancelled {
            writeln!(f, "run was cancelled")?;
        }

        let failed = self.failed();
        if !failed.is_empty() {
            writeln!(f, "attempted and failed:")?;
            for step in failed {
                match &step.failure {
                    Some(err) => writeln!(f, "  {}: {}", step.id, err)?,
                    None => writeln!(f, "  {}", step.id)?,
                }
            }
        }

        let skipped = self.skipped();
        if !skipped.is_empty() {
            writeln!(f, "never attempted:")?;
            for step in skipped {
                match &step.skip_reason {
                    Some(reason) => writeln!(f, "  {}: {}", step.id, reason)?,
                    None => writeln!(f, "  {}", step.id)?,
                }
            }
        }

        Ok(())
    }
}
