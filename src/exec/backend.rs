// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`super::executor_loop`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::ScheduledStep;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::exec::executor_loop::{spawn_executor, ExecutorCommand};
use crate::exec::process::ToolInvoker;
use crate::workdir::WorkdirManager;

/// Trait abstracting how scheduled steps are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given steps for execution. Every step must eventually
    /// produce exactly one `StepCompleted` event.
    fn spawn_ready_steps(
        &mut self,
        steps: Vec<ScheduledStep>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop every running step; each reports `Interrupted`.
    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
///
/// Wraps the executor loop in [`spawn_executor`] and forwards commands to it
/// over an mpsc channel.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl RealExecutorBackend {
    /// Create a new executor backend, wiring it to the given runtime event
    /// sender. This spawns the background executor loop immediately.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        workdir: Arc<WorkdirManager>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        let tx = spawn_executor(runtime_tx, workdir, invoker);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_steps(
        &mut self,
        steps: Vec<ScheduledStep>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for step in steps {
                tx.send(ExecutorCommand::Run(step))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorCommand::CancelAll)
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
