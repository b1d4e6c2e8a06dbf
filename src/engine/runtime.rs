// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dag::{ScheduledStep, Scheduler};
use crate::engine::StepOutcome;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::ledger::{LedgerEntry, RunLedger};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the step scheduler in response to `RuntimeEvent`s, consults the
/// run ledger, and delegates actual step execution to an `ExecutorBackend`.
///
/// This is an IO shell around `CoreRuntime`, which contains all the runtime
/// semantics.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    ledger: Arc<dyn RunLedger>,
    /// Completions produced by the shell itself (ledger hits); handled
    /// before waiting on the channel.
    local: VecDeque<RuntimeEvent>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        ledger: Arc<dyn RunLedger>,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            ledger,
            local: VecDeque::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Starts the run and dispatches the initial ready set.
    /// - Consumes `RuntimeEvent`s (local ledger hits first, then `event_rx`).
    /// - Feeds them into the core runtime and executes the returned commands.
    ///
    /// Returns the final scheduler state once every step is terminal. A
    /// ledger error aborts the run after cancelling running steps.
    pub async fn run(mut self) -> Result<Scheduler> {
        info!("tractflow runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        self.execute_commands(step.commands).await?;

        while keep_running {
            let event = match self.local.pop_front() {
                Some(e) => e,
                None => match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        warn!("runtime event channel closed before the run finished");
                        break;
                    }
                },
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);
            keep_running = step.keep_running;
            self.execute_commands(step.commands).await?;
        }

        info!("runtime exiting");
        Ok(self.core.into_scheduler())
    }

    async fn execute_commands(&mut self, commands: Vec<CoreCommand>) -> Result<()> {
        for command in commands {
            if let Err(err) = self.execute_command(command).await {
                error!(error = %err, "aborting run");
                if let Err(cancel_err) = self.executor.cancel_running().await {
                    warn!(error = %cancel_err, "failed to cancel running steps");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Record(entry) => {
                // File ledgers fsync each record; keep that off the runtime threads.
                let ledger = Arc::clone(&self.ledger);
                tokio::task::spawn_blocking(move || ledger.record(entry))
                    .await
                    .map_err(|e| anyhow::anyhow!("ledger write task failed: {e}"))??;
            }
            CoreCommand::DispatchSteps(steps) => {
                self.dispatch(steps).await?;
            }
            CoreCommand::CancelRunning => {
                info!("cancelling running steps");
                self.executor.cancel_running().await?;
            }
        }
        Ok(())
    }

    /// Resolve ledger hits locally and hand the misses to the executor.
    async fn dispatch(&mut self, steps: Vec<ScheduledStep>) -> Result<()> {
        let mut to_run = Vec::new();

        for step in steps {
            match self.ledger.lookup(&step.id, &step.fingerprint)? {
                Some(entry) if usable_hit(&entry) => {
                    debug!(step = %step.id, fingerprint = %step.fingerprint.short(), "ledger hit");
                    self.local.push_back(RuntimeEvent::StepCompleted {
                        step: step.id,
                        fingerprint: step.fingerprint,
                        outcome: StepOutcome::Succeeded {
                            outputs: entry.outputs,
                            cached: true,
                        },
                    });
                }
                Some(entry) if entry.is_success() => {
                    warn!(
                        step = %step.id,
                        "ledger success has missing committed outputs; re-running"
                    );
                    to_run.push(step);
                }
                Some(_) => {
                    info!(step = %step.id, "previous attempt failed; retrying");
                    to_run.push(step);
                }
                None => to_run.push(step),
            }
        }

        if to_run.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = to_run.iter().map(|s| s.id.as_str()).collect();
        debug!(?names, "spawning steps");
        self.executor.spawn_ready_steps(to_run).await
    }
}

/// A success whose committed outputs are all still on disk.
fn usable_hit(entry: &LedgerEntry) -> bool {
    entry.is_success() && entry.outputs.values().all(|path| path.exists())
}
