// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - consulting and updating the run ledger
//! - sending `ScheduledStep`s to the executor
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_shutdown, handle_start, handle_step_completion, CoreStep,
};
use crate::engine::RuntimeEvent;

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    /// Whether every step has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Begin the run and return the initial dispatch.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::StepCompleted {
                step,
                fingerprint,
                outcome,
            } => handle_step_completion(&mut self.scheduler, step, fingerprint, outcome),
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.scheduler),
        }
    }
}
