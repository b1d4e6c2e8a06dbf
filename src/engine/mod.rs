// src/engine/mod.rs

//! Orchestration engine for tractflow.
//!
//! This module ties together:
//! - the step scheduler
//! - the run ledger (cache lookups at dispatch, records on completion)
//! - the main runtime event loop that reacts to:
//!   - step completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`pipeline`] wires graph building,
//! fingerprinting and the runtime into a single call, and [`report`] holds
//! the aggregate result.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::dag::StepId;
use crate::errors::ExecutionError;
use crate::fingerprint::Fingerprint;

/// Outcome of a dispatched step for the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded {
        /// Committed output locations by slot name.
        outputs: BTreeMap<String, PathBuf>,
        /// Satisfied from the ledger without running the command.
        cached: bool,
    },
    Failed(ExecutionError),
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched step reached a terminal outcome.
    StepCompleted {
        step: StepId,
        fingerprint: Fingerprint,
        outcome: StepOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod pipeline;
pub mod report;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use pipeline::{default_jobs, Engine, EngineOptions, PipelineOutcome, Plan, PlannedStep};
pub use report::{RunReport, RunStatus, StepReport};
pub use runtime::Runtime;
