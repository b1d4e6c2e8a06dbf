// src/exec/step_runner.rs

//! Individual step runner.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledStep;
use crate::engine::{RuntimeEvent, StepOutcome};
use crate::errors::ExecutionError;
use crate::exec::process::ToolInvoker;
use crate::workdir::WorkdirManager;

/// Run a single step in its own working directory and emit a
/// `StepCompleted` event.
///
/// If the cancel channel fires (or its sender is dropped) while the step is
/// running, the in-flight invocation is dropped, which kills the child
/// process, and the step is reported as
/// [`ExecutionError::Interrupted`]. Its scratch directory is left as is.
pub async fn run_step(
    step: ScheduledStep,
    workdir: Arc<WorkdirManager>,
    invoker: Arc<dyn ToolInvoker>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    info!(
        step = %step.id,
        fingerprint = %step.fingerprint.short(),
        "starting step"
    );

    let outcome = tokio::select! {
        result = workdir.stage_and_run(&step, invoker.as_ref()) => match result {
            Ok(outputs) => {
                info!(step = %step.id, "step succeeded");
                StepOutcome::Succeeded { outputs, cached: false }
            }
            Err(err) => {
                warn!(step = %step.id, error = %err, "step failed");
                StepOutcome::Failed(err)
            }
        },

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => info!(
                    step = %step.id,
                    "cancellation requested for running step; killing process"
                ),
                Err(e) => debug!(
                    step = %step.id,
                    error = %e,
                    "cancel channel closed; stopping step"
                ),
            }
            StepOutcome::Failed(ExecutionError::Interrupted)
        }
    };

    if let Err(e) = runtime_tx
        .send(RuntimeEvent::StepCompleted {
            step: step.id.clone(),
            fingerprint: step.fingerprint.clone(),
            outcome,
        })
        .await
    {
        error!(
            step = %step.id,
            error = %e,
            "failed to send StepCompleted event to runtime"
        );
    }
}
