// tests/pipeline_run.rs
//
// End-to-end runs through `Engine` with a fake tool invoker and real
// working directories.

use std::error::Error;
use std::fs;
use std::future::{pending, Future};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use tractflow::dag::{SkipReason, StepDescriptor, StepStatus};
use tractflow::engine::{Engine, EngineOptions, PipelineOutcome, RunReport};
use tractflow::errors::{ExecutionError, GraphError, LedgerError, TractflowError};
use tractflow::fingerprint::Fingerprint;
use tractflow::ledger::{FileLedger, LedgerEntry, LedgerStatus, MemoryLedger, RunLedger};
use tractflow::types::StagingPolicy;
use tractflow::workdir::WorkdirManager;
use tractflow_test_utils::builders::{chain, diamond, PipelineBuilder, StepBuilder};
use tractflow_test_utils::fake_invoker::{Behaviour, FakeInvoker};
use tractflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    dir: TempDir,
    ledger: Arc<dyn RunLedger>,
    invoker: Arc<FakeInvoker>,
    jobs: usize,
}

impl Harness {
    fn new() -> Result<Self, Box<dyn Error>> {
        let dir = tempdir()?;
        let ledger = Arc::new(FileLedger::open(dir.path().join("ledger"))?);
        Ok(Self {
            dir,
            ledger,
            invoker: Arc::new(FakeInvoker::new()),
            jobs: 4,
        })
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn work_dir(&self) -> PathBuf {
        self.root().join("work")
    }

    fn input(&self, name: &str, contents: &str) -> PathBuf {
        PipelineBuilder::new(self.root()).input_file(name, contents)
    }

    fn engine(&self) -> Engine {
        let options = EngineOptions {
            jobs: self.jobs,
            work_dir: self.work_dir(),
            staging: StagingPolicy::Symlink,
            default_timeout: None,
        };
        Engine::new(options, Arc::clone(&self.ledger), self.invoker.clone())
    }

    async fn run(&self, steps: Vec<StepDescriptor>) -> Result<PipelineOutcome, Box<dyn Error>> {
        self.run_until(steps, pending()).await
    }

    async fn run_until<F>(
        &self,
        steps: Vec<StepDescriptor>,
        shutdown: F,
    ) -> Result<PipelineOutcome, Box<dyn Error>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Ok(with_timeout(self.engine().run(steps, shutdown)).await?)
    }
}

fn report(outcome: &PipelineOutcome) -> &RunReport {
    outcome.report().expect("run completed")
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

#[tokio::test]
async fn first_run_executes_everything_in_dependency_order() -> TestResult {
    init_tracing();
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");

    let outcome = h.run(diamond(&input)).await?;
    let report = report(&outcome);

    assert_eq!(outcome.exit_code(), 0);
    let mut executed = report.executed();
    executed.sort();
    assert_eq!(executed, vec!["a", "b", "c", "d"]);
    assert!(report.cached().is_empty());

    let order = h.invoker.invoked_steps();
    let pos = |id: &str| order.iter().position(|s| s == id).unwrap();
    assert_eq!(pos("a"), 0);
    assert!(pos("b") < pos("d") && pos("c") < pos("d"));

    // d sees b's committed output through its staged input.
    let d_out = &report.step("d").unwrap().outputs["out"];
    assert_eq!(fs::read_to_string(d_out)?, "d:out\n");
    let committed_d = d_out.parent().unwrap();
    assert_eq!(fs::read_to_string(committed_d.join("inputs/b/b.out"))?, "b:out\n");
    Ok(())
}

#[tokio::test]
async fn second_run_with_unchanged_inputs_executes_nothing() -> TestResult {
    init_tracing();
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");

    let first = h.run(chain(&input)).await?;
    assert_eq!(first.exit_code(), 0);
    h.invoker.clear();

    // A fresh ledger handle over the same directory behaves like a new process.
    let reopened = Harness {
        ledger: Arc::new(FileLedger::open(h.root().join("ledger"))?),
        invoker: Arc::clone(&h.invoker),
        dir: h.dir,
        jobs: 4,
    };
    let second = reopened.run(chain(&input)).await?;
    let report = report(&second);

    assert_eq!(second.exit_code(), 0);
    assert!(reopened.invoker.invocations().is_empty());
    assert_eq!(report.cached(), vec!["a", "b", "c"]);
    assert!(report.executed().is_empty());
    assert_eq!(
        report.step("c").unwrap().outputs,
        crate::report(&first).step("c").unwrap().outputs
    );
    Ok(())
}

#[tokio::test]
async fn changed_input_reruns_only_its_downstream() -> TestResult {
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");
    let other = h.input("t1.nii", "anat");

    let steps = || {
        let mut steps = chain(&input);
        steps.push(StepBuilder::new("side").external("src", other.clone()).build());
        steps
    };

    h.run(steps()).await?;
    h.invoker.clear();

    fs::write(&input, "raw, re-acquired")?;
    let outcome = h.run(steps()).await?;
    let report = report(&outcome);

    assert_eq!(sorted(h.invoker.invoked_steps()), vec!["a", "b", "c"]);
    assert_eq!(report.cached(), vec!["side"]);

    // Old and new results coexist in the ledger under distinct keys.
    assert_eq!(h.ledger.entries_for("a")?.len(), 2);
    assert_eq!(h.ledger.entries_for("side")?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failure_reports_partial_failure_and_skips_dependents() -> TestResult {
    init_tracing();
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");
    h.invoker.set_behaviour("b", Behaviour::Fail(4));

    let outcome = h.run(diamond(&input)).await?;
    let report = report(&outcome);

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(report.status_of("c"), Some(StepStatus::Succeeded));
    assert_eq!(
        report.step("b").unwrap().failure,
        Some(ExecutionError::NonZeroExit { code: 4 })
    );
    assert_eq!(
        report.step("d").unwrap().skip_reason,
        Some(SkipReason::UpstreamFailed("b".to_string()))
    );
    assert_eq!(h.invoker.count_for("d"), 0);

    let failed = h.ledger.entries_for("b")?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, LedgerStatus::Failed);

    // A failed entry is not a cache hit: fixing the tool re-runs b and d only.
    h.invoker.set_behaviour("b", Behaviour::Succeed);
    h.invoker.clear();
    let retry = h.run(diamond(&input)).await?;
    assert_eq!(retry.exit_code(), 0);
    assert_eq!(sorted(h.invoker.invoked_steps()), vec!["b", "d"]);
    assert!(h.ledger.lookup("b", report.step("b").unwrap().fingerprint.as_ref().unwrap())?
        .is_some_and(|e| e.is_success()));
    Ok(())
}

#[tokio::test]
async fn missing_declared_output_fails_the_step() -> TestResult {
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");
    h.invoker
        .set_behaviour("a", Behaviour::SkipOutput("out".to_string()));

    let outcome = h.run(chain(&input)).await?;
    let report = report(&outcome);

    assert!(matches!(
        report.step("a").unwrap().failure,
        Some(ExecutionError::MissingOutput { ref output, .. }) if output == "out"
    ));
    assert_eq!(report.skipped().len(), 2);
    Ok(())
}

#[tokio::test]
async fn unstartable_tool_is_a_spawn_failure() -> TestResult {
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");
    h.invoker.set_behaviour("a", Behaviour::SpawnError);

    let outcome = h.run(chain(&input)).await?;
    assert!(matches!(
        report(&outcome).step("a").unwrap().failure,
        Some(ExecutionError::Spawn { .. })
    ));
    assert_eq!(outcome.exit_code(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrency_never_exceeds_jobs() -> TestResult {
    init_tracing();
    for jobs in [1, 2] {
        let mut h = Harness::new()?;
        h.jobs = jobs;
        h.invoker = Arc::new(FakeInvoker::new().with_delay(Duration::from_millis(50)));
        let input = h.input("dwi.nii", "raw");

        let steps: Vec<StepDescriptor> = (0..6)
            .map(|i| {
                StepBuilder::new(&format!("s{i}"))
                    .external("src", input.clone())
                    .build()
            })
            .collect();
        let outcome = h.run(steps).await?;

        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(h.invoker.invocations().len(), 6);
        assert!(
            h.invoker.max_concurrency() <= jobs,
            "saw {} in flight with jobs={jobs}",
            h.invoker.max_concurrency()
        );
    }
    Ok(())
}

#[tokio::test]
async fn shared_ancestor_runs_once_and_is_recorded_once() -> TestResult {
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");

    h.run(diamond(&input)).await?;
    h.run(diamond(&input)).await?;

    assert_eq!(h.invoker.count_for("a"), 1);
    for id in ["a", "b", "c", "d"] {
        assert_eq!(h.ledger.entries_for(id)?.len(), 1, "{id}");
    }
    Ok(())
}

#[tokio::test]
async fn interrupted_run_resumes_without_redoing_finished_steps() -> TestResult {
    init_tracing();
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");
    h.invoker.set_behaviour("b", Behaviour::Block);

    let shutdown = async { tokio::time::sleep(Duration::from_millis(300)).await };
    let outcome = h.run_until(chain(&input), shutdown).await?;
    let report = report(&outcome);

    assert!(report.cancelled);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(report.status_of("a"), Some(StepStatus::Succeeded));
    assert_eq!(
        report.step("b").unwrap().failure,
        Some(ExecutionError::Interrupted)
    );
    assert_eq!(
        report.step("c").unwrap().skip_reason,
        Some(SkipReason::Cancelled)
    );

    // The interrupted attempt is neither recorded nor committed.
    assert!(h.ledger.entries_for("b")?.is_empty());
    let workdir = WorkdirManager::new(h.work_dir(), StagingPolicy::Symlink);
    assert_eq!(fs::read_dir(workdir.scratch_root("b"))?.count(), 1);

    h.invoker.set_behaviour("b", Behaviour::Succeed);
    h.invoker.clear();
    let resumed = h.run(chain(&input)).await?;

    assert_eq!(resumed.exit_code(), 0);
    assert_eq!(h.invoker.invoked_steps(), vec!["b", "c"]);
    assert_eq!(crate::report(&resumed).cached(), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn step_timeout_fails_the_step() -> TestResult {
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");
    h.invoker.set_behaviour("slow", Behaviour::Block);

    let steps = vec![
        StepBuilder::new("slow")
            .external("src", input)
            .timeout(Duration::from_millis(100))
            .build(),
    ];
    let outcome = h.run(steps).await?;

    assert_eq!(
        report(&outcome).step("slow").unwrap().failure,
        Some(ExecutionError::TimedOut {
            after: Duration::from_millis(100)
        })
    );
    assert_eq!(h.ledger.entries_for("slow")?[0].status, LedgerStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn deleted_committed_outputs_force_a_rerun() -> TestResult {
    let h = Harness::new()?;
    let input = h.input("dwi.nii", "raw");

    let first = h.run(chain(&input)).await?;
    let c_out = report(&first).step("c").unwrap().outputs["out"].clone();
    fs::remove_dir_all(c_out.parent().unwrap())?;
    h.invoker.clear();

    let second = h.run(chain(&input)).await?;
    assert_eq!(h.invoker.invoked_steps(), vec!["c"]);
    assert!(report(&second).step("c").unwrap().outputs["out"].is_file());
    Ok(())
}

#[tokio::test]
async fn invalid_graph_executes_nothing() -> TestResult {
    let h = Harness::new()?;
    let steps = vec![
        StepBuilder::new("a").after("b").build(),
        StepBuilder::new("b").after("a").build(),
    ];

    let outcome = h.run(steps).await?;

    assert!(matches!(
        outcome,
        PipelineOutcome::GraphError(GraphError::CyclicDependency { .. })
    ));
    assert_eq!(outcome.exit_code(), 3);
    assert!(outcome.report().is_none());
    assert!(h.invoker.invocations().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_external_input_skips_without_invoking() -> TestResult {
    let h = Harness::new()?;
    let present = h.input("t1.nii", "anat");
    let steps = vec![
        StepBuilder::new("a")
            .external("src", h.root().join("inputs/absent.nii"))
            .build(),
        StepBuilder::new("b").after("a").build(),
        StepBuilder::new("ok").external("src", present).build(),
    ];

    let outcome = h.run(steps).await?;
    let report = report(&outcome);

    assert_eq!(outcome.exit_code(), 2);
    assert!(matches!(
        report.step("a").unwrap().skip_reason,
        Some(SkipReason::InputUnavailable(_))
    ));
    assert_eq!(
        report.step("b").unwrap().skip_reason,
        Some(SkipReason::UpstreamUnavailable("a".to_string()))
    );
    assert_eq!(h.invoker.invoked_steps(), vec!["ok"]);
    assert!(report.failed().is_empty());
    Ok(())
}

#[tokio::test]
async fn memory_ledger_caches_within_a_process() -> TestResult {
    let mut h = Harness::new()?;
    h.ledger = Arc::new(MemoryLedger::new());
    let input = h.input("dwi.nii", "raw");

    h.run(chain(&input)).await?;
    h.invoker.clear();
    let second = h.run(chain(&input)).await?;

    assert!(h.invoker.invocations().is_empty());
    assert_eq!(report(&second).cached().len(), 3);
    Ok(())
}

/// Memory ledger that refuses to record, or to look up one step.
#[derive(Debug, Default)]
struct BrokenLedger {
    inner: MemoryLedger,
    refuse_records: bool,
    refuse_lookup_of: Option<String>,
}

impl RunLedger for BrokenLedger {
    fn lookup(
        &self,
        step: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        if self.refuse_lookup_of.as_deref() == Some(step) {
            return Err(LedgerError::Poisoned);
        }
        self.inner.lookup(step, fingerprint)
    }

    fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        if self.refuse_records {
            return Err(LedgerError::Poisoned);
        }
        self.inner.record(entry)
    }

    fn entries_for(&self, step: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.entries_for(step)
    }
}

#[tokio::test]
async fn ledger_write_failure_aborts_the_run() -> TestResult {
    let mut h = Harness::new()?;
    h.ledger = Arc::new(BrokenLedger {
        refuse_records: true,
        ..BrokenLedger::default()
    });
    let input = h.input("dwi.nii", "raw");

    let result = with_timeout(h.engine().run(chain(&input), pending())).await;

    assert!(
        matches!(result, Err(TractflowError::Ledger(LedgerError::Poisoned))),
        "got {result:?}"
    );
    assert_eq!(h.invoker.invoked_steps(), vec!["a"]);
    let workdir = WorkdirManager::new(h.work_dir(), StagingPolicy::Symlink);
    assert!(!workdir.scratch_root("b").exists());
    Ok(())
}

#[tokio::test]
async fn ledger_lookup_failure_at_dispatch_aborts_the_run() -> TestResult {
    let mut h = Harness::new()?;
    h.ledger = Arc::new(BrokenLedger {
        refuse_lookup_of: Some("b".to_string()),
        ..BrokenLedger::default()
    });
    let input = h.input("dwi.nii", "raw");

    let result = with_timeout(h.engine().run(chain(&input), pending())).await;

    assert!(
        matches!(result, Err(TractflowError::Ledger(LedgerError::Poisoned))),
        "got {result:?}"
    );
    assert_eq!(h.invoker.invoked_steps(), vec!["a"]);
    assert!(h.ledger.entries_for("a")?.iter().all(|e| e.is_success()));
    assert!(h.ledger.entries_for("c")?.is_empty());
    Ok(())
}
