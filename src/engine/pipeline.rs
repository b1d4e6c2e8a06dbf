// src/engine/pipeline.rs

//! One-call pipeline execution: build the graph, fingerprint it, and drive
//! the runtime until every step is terminal.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::{build_graph, Scheduler, StepDescriptor, StepGraph, StepId};
use crate::engine::core::CoreRuntime;
use crate::engine::report::{RunReport, RunStatus};
use crate::engine::runtime::Runtime;
use crate::engine::RuntimeEvent;
use crate::errors::{GraphError, LedgerError, Result};
use crate::exec::{RealExecutorBackend, ToolInvoker};
use crate::fingerprint::{Fingerprint, FingerprintEngine, FingerprintReport, Unavailability};
use crate::fs::{FileSystem, RealFileSystem};
use crate::ledger::RunLedger;
use crate::types::StagingPolicy;
use crate::workdir::WorkdirManager;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_PARTIAL_FAILURE: i32 = 2;
pub const EXIT_GRAPH_ERROR: i32 = 3;

/// Default worker count: the number of available CPUs.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of steps in flight.
    pub jobs: usize,
    pub work_dir: PathBuf,
    pub staging: StagingPolicy,
    /// Applied to steps without their own timeout.
    pub default_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            work_dir: PathBuf::from(crate::config::model::DEFAULT_WORK_DIR),
            staging: StagingPolicy::default(),
            default_timeout: None,
        }
    }
}

/// Result of a pipeline invocation that got as far as building the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed(RunReport),
    /// The graph was rejected; nothing was executed.
    GraphError(GraphError),
}

impl PipelineOutcome {
    /// Process exit code: 0 all succeeded, 2 partial failure, 3 graph error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::Completed(report) => match report.status() {
                RunStatus::AllSucceeded => EXIT_OK,
                RunStatus::PartialFailure => EXIT_PARTIAL_FAILURE,
            },
            PipelineOutcome::GraphError(_) => EXIT_GRAPH_ERROR,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            PipelineOutcome::Completed(report) => Some(report),
            PipelineOutcome::GraphError(_) => None,
        }
    }
}

/// A validated graph together with its fingerprints.
#[derive(Debug, Clone)]
pub struct Plan {
    pub graph: StepGraph,
    pub fingerprints: FingerprintReport,
}

/// Dry-run view of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub id: StepId,
    pub fingerprint: Option<Fingerprint>,
    /// A usable ledger success exists for this fingerprint.
    pub cached: bool,
    /// Why the step cannot run, if it cannot.
    pub unavailable: Option<String>,
}

impl Plan {
    pub fn build(steps: Vec<StepDescriptor>, fs: Arc<dyn FileSystem>) -> std::result::Result<Self, GraphError> {
        let graph = build_graph(steps)?;
        let fingerprints = FingerprintEngine::new(fs).fingerprint_graph(&graph);
        Ok(Self {
            graph,
            fingerprints,
        })
    }

    /// Per-step fingerprint and cache state, in topological order.
    pub fn describe(&self, ledger: &dyn RunLedger) -> std::result::Result<Vec<PlannedStep>, LedgerError> {
        let mut planned = Vec::with_capacity(self.graph.len());

        for id in self.graph.topo_order() {
            let fingerprint = self.fingerprints.fingerprint_of(id).cloned();
            let cached = match &fingerprint {
                Some(fp) => ledger
                    .lookup(id, fp)?
                    .is_some_and(|e| e.is_success() && e.outputs.values().all(|p| p.exists())),
                None => false,
            };
            let unavailable = self.fingerprints.unavailability_of(id).map(|u| match u {
                Unavailability::Input(err) => err.to_string(),
                Unavailability::Upstream(producer) => {
                    format!("upstream step '{producer}' has unavailable inputs")
                }
            });

            planned.push(PlannedStep {
                id: id.clone(),
                fingerprint,
                cached,
                unavailable,
            });
        }

        Ok(planned)
    }
}

/// Pipeline engine: owns the collaborators a run needs.
#[derive(Debug, Clone)]
pub struct Engine {
    options: EngineOptions,
    ledger: Arc<dyn RunLedger>,
    invoker: Arc<dyn ToolInvoker>,
    fs: Arc<dyn FileSystem>,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        ledger: Arc<dyn RunLedger>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self {
            options,
            ledger,
            invoker,
            fs: Arc::new(RealFileSystem),
        }
    }

    /// Read external inputs through `fs` when fingerprinting.
    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    pub fn plan(&self, steps: Vec<StepDescriptor>) -> std::result::Result<Plan, GraphError> {
        Plan::build(steps, Arc::clone(&self.fs))
    }

    /// Build, fingerprint and execute `steps`.
    ///
    /// When `shutdown` resolves, dispatch stops and running steps are
    /// killed. Only infrastructure failures (ledger, channels) are `Err`.
    pub async fn run<F>(&self, steps: Vec<StepDescriptor>, shutdown: F) -> Result<PipelineOutcome>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let plan = match self.plan(steps) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "step graph rejected; nothing executed");
                return Ok(PipelineOutcome::GraphError(err));
            }
        };

        let report = self.run_plan(plan, shutdown).await?;
        Ok(PipelineOutcome::Completed(report))
    }

    /// Execute an already built plan.
    pub async fn run_plan<F>(&self, plan: Plan, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

        let workdir = Arc::new(
            WorkdirManager::new(&self.options.work_dir, self.options.staging)
                .with_default_timeout(self.options.default_timeout),
        );
        let executor = RealExecutorBackend::new(rt_tx.clone(), workdir, Arc::clone(&self.invoker));

        // Shutdown signal → graceful cancellation.
        let shutdown_task = tokio::spawn(async move {
            shutdown.await;
            let _ = rt_tx.send(RuntimeEvent::ShutdownRequested).await;
        });

        let scheduler = Scheduler::new(plan.graph, &plan.fingerprints, self.options.jobs);
        let core = CoreRuntime::new(scheduler);
        let runtime = Runtime::new(core, rt_rx, executor, Arc::clone(&self.ledger));

        let result = runtime.run().await;
        shutdown_task.abort();
        let scheduler = result?;

        let report = RunReport::from_scheduler(&scheduler);
        info!(
            status = ?report.status(),
            executed = report.executed().len(),
            cached = report.cached().len(),
            failed = report.failed().len(),
            skipped = report.skipped().len(),
            "pipeline run finished"
        );
        Ok(report)
    }
}
