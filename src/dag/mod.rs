// src/dag/mod.rs

//! Step descriptors, graph construction and scheduling.
//!
//! - [`descriptor`] defines the declarative step type.
//! - [`builder`] validates descriptors and assembles the graph.
//! - [`graph`] holds the validated, acyclic step graph.
//! - [`scheduler`] contains the per-run state machine that decides
//!   which steps are ready to run, and when dependents can be scheduled.
//! - [`node_state`] provides per-node status and scheduled step types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod builder;
pub mod descriptor;
pub mod graph;
pub mod node_state;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use builder::build_graph;
pub use descriptor::{
    CommandTemplate, InputBinding, InputSource, OutputSlot, ParamValue, StepDescriptor, StepId,
};
pub use graph::StepGraph;
pub use node_state::{NodeState, ScheduledStep, SkipReason, StepStatus};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
