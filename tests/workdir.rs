// tests/workdir.rs
//
// Exercises the Working-Directory Manager against real `sh` processes.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tractflow::dag::{CommandTemplate, ScheduledStep, StepDescriptor};
use tractflow::errors::ExecutionError;
use tractflow::exec::ProcessInvoker;
use tractflow::fingerprint::{FingerprintEngine, Fingerprint};
use tractflow::fs::RealFileSystem;
use tractflow::types::StagingPolicy;
use tractflow::workdir::{WorkdirManager, COMMAND_FILE, COMMITTED_DIR, SCRATCH_DIR};
use tractflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn shell_step(id: &str, script: &str, input: &Path) -> StepDescriptor {
    StepDescriptor::new(id, CommandTemplate::new("sh").args(["-c", script]))
        .external_input("src", input)
        .output("out", "result/out.txt")
}

fn schedule(step: StepDescriptor) -> Result<ScheduledStep, Box<dyn Error>> {
    let fingerprint: Fingerprint =
        FingerprintEngine::new(Arc::new(RealFileSystem)).fingerprint(&step, &HashMap::new())?;
    let inputs: BTreeMap<String, PathBuf> = step
        .inputs
        .iter()
        .filter_map(|i| match &i.source {
            tractflow::dag::InputSource::External(p) => Some((i.name.clone(), p.clone())),
            tractflow::dag::InputSource::Step { .. } => None,
        })
        .collect();

    Ok(ScheduledStep {
        id: step.id.clone(),
        fingerprint,
        descriptor: step,
        inputs,
    })
}

fn scratch_attempts(workdir: &WorkdirManager, step: &str) -> usize {
    fs::read_dir(workdir.scratch_root(step))
        .map(|rd| rd.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn successful_step_is_committed_with_logs_and_command() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let input = dir.path().join("t1.txt");
    fs::write(&input, "voxels\n")?;

    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Symlink);
    let step = schedule(shell_step(
        "copy",
        "echo working; cat {inputs.src} > {outputs.out}",
        &input,
    ))?;

    let outputs = with_timeout(workdir.stage_and_run(&step, &ProcessInvoker::new())).await?;

    let committed = workdir.committed_dir("copy", &step.fingerprint);
    assert_eq!(outputs["out"], committed.join("result/out.txt"));
    assert_eq!(fs::read_to_string(&outputs["out"])?, "voxels\n");
    assert!(committed.join(COMMAND_FILE).is_file());
    assert_eq!(fs::read_to_string(committed.join("stdout.log"))?, "working\n");
    assert!(committed.join("inputs/src/t1.txt").exists());

    // The scratch attempt was moved, not copied.
    assert_eq!(scratch_attempts(&workdir, "copy"), 0);
    assert!(dir.path().join("work").join(COMMITTED_DIR).is_dir());
    Ok(())
}

#[tokio::test]
async fn copy_staging_places_independent_copies() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("bval");
    fs::write(&input, "0 1000 1000\n")?;

    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Copy);
    let step = schedule(shell_step("copy", "cat {inputs.src} > {outputs.out}", &input))?;
    workdir.stage_and_run(&step, &ProcessInvoker::new()).await?;

    let staged = workdir
        .committed_dir("copy", &step.fingerprint)
        .join("inputs/src/bval");
    assert!(!fs::symlink_metadata(&staged)?.file_type().is_symlink());
    assert_eq!(fs::read_to_string(staged)?, "0 1000 1000\n");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn copy_staging_of_a_directory_runs_off_the_runtime_thread() -> TestResult {
    let dir = tempdir()?;
    let subject = dir.path().join("sub-01");
    fs::create_dir_all(subject.join("mri"))?;
    fs::create_dir_all(subject.join("label"))?;
    fs::write(subject.join("mri/aseg.mgz"), "aseg")?;
    fs::write(subject.join("label/lh.cortex.label"), "cortex")?;

    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Copy);
    let step = schedule(shell_step(
        "gen5tt",
        "cat {inputs.src}/mri/aseg.mgz > {outputs.out}",
        &subject,
    ))?;

    // A single-threaded runtime still serves other tasks while inputs copy.
    let ticker = tokio::spawn(async { tokio::task::yield_now().await });
    let outputs = with_timeout(workdir.stage_and_run(&step, &ProcessInvoker::new())).await?;
    ticker.await?;

    assert_eq!(fs::read_to_string(&outputs["out"])?, "aseg");
    let staged = workdir
        .committed_dir("gen5tt", &step.fingerprint)
        .join("inputs/src/sub-01");
    assert!(!fs::symlink_metadata(&staged)?.file_type().is_symlink());
    assert_eq!(fs::read_to_string(staged.join("label/lh.cortex.label"))?, "cortex");
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_fails_and_keeps_scratch() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let input = dir.path().join("in.txt");
    fs::write(&input, "x")?;

    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Symlink);
    let step = schedule(shell_step("broken", "echo nope >&2; exit 7", &input))?;

    let err = workdir
        .stage_and_run(&step, &ProcessInvoker::new())
        .await
        .unwrap_err();

    assert_eq!(err, ExecutionError::NonZeroExit { code: 7 });
    assert!(!workdir.committed_dir("broken", &step.fingerprint).exists());
    assert_eq!(scratch_attempts(&workdir, "broken"), 1);

    // A retry gets a fresh attempt directory; the failed one is preserved.
    let _ = workdir.stage_and_run(&step, &ProcessInvoker::new()).await;
    assert_eq!(scratch_attempts(&workdir, "broken"), 2);

    let attempt = fs::read_dir(workdir.scratch_root("broken"))?
        .filter_map(|e| e.ok())
        .next()
        .expect("attempt dir")
        .path();
    assert_eq!(fs::read_to_string(attempt.join("stderr.log"))?, "nope\n");
    Ok(())
}

#[tokio::test]
async fn missing_or_empty_output_is_a_failure() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("in.txt");
    fs::write(&input, "x")?;
    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Symlink);

    let silent = schedule(shell_step("silent", "true", &input))?;
    let err = workdir
        .stage_and_run(&silent, &ProcessInvoker::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::MissingOutput { ref output, .. } if output == "out"));

    let empty = schedule(shell_step("empty", ": > {outputs.out}", &input))?;
    let err = workdir
        .stage_and_run(&empty, &ProcessInvoker::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::MissingOutput { .. }));
    assert!(!workdir.committed_dir("empty", &empty.fingerprint).exists());
    Ok(())
}

#[tokio::test]
async fn unknown_program_is_a_spawn_error() -> TestResult {
    let dir = tempdir()?;
    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Symlink);
    let step = StepDescriptor::new("ghost", CommandTemplate::new("tractflow-no-such-tool"))
        .output("out", "out.txt");
    let step = schedule(step)?;

    let err = workdir
        .stage_and_run(&step, &ProcessInvoker::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Spawn { ref program, .. } if program == "tractflow-no-such-tool"));
    Ok(())
}

#[tokio::test]
async fn timeout_kills_the_process() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("in.txt");
    fs::write(&input, "x")?;
    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Symlink)
        .with_default_timeout(Some(Duration::from_millis(200)));

    let step = schedule(shell_step("slow", "exec sleep 30", &input))?;
    let err = with_timeout(workdir.stage_and_run(&step, &ProcessInvoker::new()))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ExecutionError::TimedOut {
            after: Duration::from_millis(200)
        }
    );
    assert_eq!(scratch_attempts(&workdir, "slow"), 1);
    Ok(())
}

#[tokio::test]
async fn stale_committed_directory_is_replaced() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("in.txt");
    fs::write(&input, "fresh")?;
    let workdir = WorkdirManager::new(dir.path().join("work"), StagingPolicy::Symlink);
    let step = schedule(shell_step("copy", "cat {inputs.src} > {outputs.out}", &input))?;

    let stale = workdir.committed_dir("copy", &step.fingerprint);
    fs::create_dir_all(stale.join("result"))?;
    fs::write(stale.join("result/out.txt"), "stale")?;

    let outputs = workdir.stage_and_run(&step, &ProcessInvoker::new()).await?;
    assert_eq!(fs::read_to_string(&outputs["out"])?, "fresh");
    Ok(())
}

#[test]
fn layout_keeps_step_ids_inside_the_work_root() {
    let workdir = WorkdirManager::new("/work", StagingPolicy::Symlink);
    let scratch = workdir.scratch_root("../../etc");
    assert!(scratch.starts_with(Path::new("/work").join(SCRATCH_DIR)));
    assert_eq!(scratch.components().count(), Path::new("/work/scratch/x").components().count());
}
