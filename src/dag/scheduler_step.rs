// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::descriptor::StepId;
use crate::dag::node_state::ScheduledStep;

/// Structured result of a single scheduler "step".
///
/// Tests drive the scheduler manually and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Steps dispatched to worker slots as a result of this step.
    pub dispatched: Vec<ScheduledStep>,
    /// Steps newly marked as skipped in this step.
    pub newly_skipped: Vec<StepId>,
    /// Whether every node is now terminal.
    pub run_finished: bool,
}
