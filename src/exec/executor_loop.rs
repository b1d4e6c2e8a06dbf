// src/exec/executor_loop.rs

//! Main executor loop that manages running steps.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::dag::{ScheduledStep, StepId};
use crate::engine::RuntimeEvent;
use crate::exec::process::ToolInvoker;
use crate::exec::step_runner::run_step;
use crate::workdir::WorkdirManager;

/// Requests accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorCommand {
    Run(ScheduledStep),
    /// Kill every step that is still running.
    CancelAll,
}

/// Internal handle for a currently-running step.
///
/// - `cancel` is used to request that the step be stopped.
/// - `handle` is the Tokio task that is actually running it.
struct ActiveStep {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each scheduled step is executed in its own Tokio task; the scheduler has
/// already bounded how many are in flight.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    workdir: Arc<WorkdirManager>,
    invoker: Arc<dyn ToolInvoker>,
) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<StepId, ActiveStep> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, step| !step.handle.is_finished());

            match command {
                ExecutorCommand::Run(step) => {
                    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
                    let id = step.id.clone();
                    let handle = tokio::spawn(run_step(
                        step,
                        Arc::clone(&workdir),
                        Arc::clone(&invoker),
                        runtime_tx.clone(),
                        cancel_rx,
                    ));
                    active.insert(
                        id,
                        ActiveStep {
                            cancel: Some(cancel_tx),
                            handle,
                        },
                    );
                }
                ExecutorCommand::CancelAll => cancel_all(&mut active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn cancel_all(active: &mut HashMap<StepId, ActiveStep>) {
    for (name, step) in active.iter_mut() {
        match step.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(step = %name, "step already finished while cancelling");
                }
            }
            None => debug!(step = %name, "step already cancelled"),
        }
    }
}
