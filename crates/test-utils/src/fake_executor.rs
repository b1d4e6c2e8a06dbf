use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tractflow::dag::ScheduledStep;
use tractflow::engine::{RuntimeEvent, StepOutcome};
use tractflow::errors::{ExecutionError, Result};
use tractflow::exec::ExecutorBackend;

/// A fake executor backend that:
/// - records which steps were dispatched
/// - immediately reports `StepCompleted` for each of them, failing the ones
///   listed in `failing` with exit code 1
/// - places every declared output of a successful step under `/fake/<step>/`.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    failing: HashSet<String>,
    cancels: Arc<Mutex<usize>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            runtime_tx,
            executed,
            failing: HashSet::new(),
            cancels: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(mut self, step: &str) -> Self {
        self.failing.insert(step.to_string());
        self
    }

    /// Number of `cancel_running` calls seen, shared with the test.
    pub fn cancel_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.cancels)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_steps(
        &mut self,
        steps: Vec<ScheduledStep>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let failing = self.failing.clone();

        Box::pin(async move {
            for step in steps {
                executed.lock().unwrap().push(step.id.clone());

                let outcome = if failing.contains(&step.id) {
                    StepOutcome::Failed(ExecutionError::NonZeroExit { code: 1 })
                } else {
                    let outputs = step
                        .descriptor
                        .outputs
                        .iter()
                        .map(|slot| {
                            (
                                slot.name.clone(),
                                PathBuf::from("/fake").join(&step.id).join(&slot.path),
                            )
                        })
                        .collect::<BTreeMap<_, _>>();
                    StepOutcome::Succeeded {
                        outputs,
                        cached: false,
                    }
                };

                tx.send(RuntimeEvent::StepCompleted {
                    step: step.id.clone(),
                    fingerprint: step.fingerprint.clone(),
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_running(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let cancels = Arc::clone(&self.cancels);
        Box::pin(async move {
            *cancels.lock().unwrap() += 1;
            Ok(())
        })
    }
}
