// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::dag::{ScheduledStep, Scheduler, SchedulerStep};
use crate::engine::StepOutcome;
use crate::fingerprint::Fingerprint;
use crate::ledger::LedgerEntry;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Persist this entry in the run ledger before anything downstream runs.
    Record(LedgerEntry),
    /// Look these steps up in the ledger and execute the misses.
    DispatchSteps(Vec<ScheduledStep>),
    /// Stop every running step.
    CancelRunning,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a [`SchedulerStep`] into commands.
fn step_from_scheduler(
    scheduler: &Scheduler,
    mut commands: Vec<CoreCommand>,
    sched: SchedulerStep,
) -> CoreStep {
    if !sched.newly_skipped.is_empty() {
        debug!(skipped = ?sched.newly_skipped, "steps skipped");
    }
    if !sched.dispatched.is_empty() {
        commands.push(CoreCommand::DispatchSteps(sched.dispatched));
    }
    CoreStep {
        commands,
        keep_running: !scheduler.is_finished(),
    }
}

/// Handle the start of a run: seed the initial ready set.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let sched = scheduler.start();
    step_from_scheduler(scheduler, Vec::new(), sched)
}

/// Handle a step completion event.
///
/// Fresh successes and terminal failures are recorded in the ledger; cache
/// hits are already recorded and interrupted steps never reached a terminal
/// state, so neither produces a `Record` command.
pub fn handle_step_completion(
    scheduler: &mut Scheduler,
    step: String,
    fingerprint: Fingerprint,
    outcome: StepOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    match &outcome {
        StepOutcome::Succeeded {
            outputs,
            cached: false,
        } => {
            commands.push(CoreCommand::Record(LedgerEntry::succeeded(
                step.clone(),
                fingerprint,
                outputs.clone(),
            )));
        }
        StepOutcome::Succeeded { cached: true, .. } => {
            info!(step = %step, "step satisfied from ledger; not re-running");
        }
        StepOutcome::Failed(err) if err.is_recordable() => {
            commands.push(CoreCommand::Record(LedgerEntry::failed(
                step.clone(),
                fingerprint,
                err,
            )));
        }
        StepOutcome::Failed(_) => {
            debug!(step = %step, "interrupted step not recorded");
        }
    }

    let sched = scheduler.step_completion(&step, outcome);
    step_from_scheduler(scheduler, commands, sched)
}

/// Handle a shutdown request: stop dispatching and cancel running steps.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    if scheduler.is_cancelled() {
        debug!("shutdown already in progress");
        return CoreStep {
            commands: Vec::new(),
            keep_running: !scheduler.is_finished(),
        };
    }

    let sched = scheduler.cancel();
    let mut commands = Vec::new();
    if scheduler.running() > 0 {
        commands.push(CoreCommand::CancelRunning);
    }
    step_from_scheduler(scheduler, commands, sched)
}
