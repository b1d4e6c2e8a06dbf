use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tractflow::exec::{Invocation, InvocationResult, ToolInvoker};

/// How the fake tool behaves for a given step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    /// Write every declared output and exit 0.
    Succeed,
    /// Write nothing and exit with this code.
    Fail(i32),
    /// Exit 0 but leave the named output unwritten.
    SkipOutput(String),
    /// Never finish; only cancellation or a timeout ends it.
    Block,
    /// The tool cannot be started at all.
    SpawnError,
}

/// A fake tool invoker that:
/// - records every invocation
/// - writes `<step>:<output>` into each declared output
/// - follows a per-step [`Behaviour`] (default: `Succeed`)
/// - tracks how many invocations were in flight at once.
#[derive(Default)]
pub struct FakeInvoker {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl fmt::Debug for FakeInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeInvoker")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_behaviour(self, step: &str, behaviour: Behaviour) -> Self {
        self.set_behaviour(step, behaviour);
        self
    }

    pub fn set_behaviour(&self, step: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(step.to_string(), behaviour);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Step ids in invocation order.
    pub fn invoked_steps(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.step.clone())
            .collect()
    }

    pub fn count_for(&self, step: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.step == step)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Highest number of simultaneously running invocations seen.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behaviour_for(&self, step: &str) -> Behaviour {
        self.behaviours
            .lock()
            .unwrap()
            .get(step)
            .cloned()
            .unwrap_or(Behaviour::Succeed)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ToolInvoker for FakeInvoker {
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<InvocationResult>> + Send + '_>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(invocation.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let skipped = match self.behaviour_for(&invocation.step) {
                Behaviour::Succeed => None,
                Behaviour::SkipOutput(name) => Some(name),
                Behaviour::Fail(code) => return Ok(InvocationResult { exit_code: code }),
                Behaviour::Block => std::future::pending().await,
                Behaviour::SpawnError => anyhow::bail!("fake-tool: no such program"),
            };

            for (name, path) in &invocation.outputs {
                if skipped.as_deref() == Some(name.as_str()) {
                    continue;
                }
                tokio::fs::write(path, format!("{}:{name}\n", invocation.step)).await?;
            }

            Ok(InvocationResult { exit_code: 0 })
        })
    }
}
