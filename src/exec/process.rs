// src/exec/process.rs

//! External tool invocation.
//!
//! The engine only sees the [`ToolInvoker`] capability: run a rendered
//! command in a directory and report its exit status. [`ProcessInvoker`] is
//! the production implementation on top of `tokio::process`; tests plug in a
//! fake that never spawns anything.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::StepId;

/// Captured standard output of an invocation, inside its working directory.
pub const STDOUT_LOG: &str = "stdout.log";
/// Captured standard error of an invocation, inside its working directory.
pub const STDERR_LOG: &str = "stderr.log";

/// A fully rendered command, ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub step: StepId,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Scratch directory the command runs in.
    pub cwd: PathBuf,
    /// Staged input locations by input name.
    pub inputs: BTreeMap<String, PathBuf>,
    /// Where each declared output is expected, by slot name.
    pub outputs: BTreeMap<String, PathBuf>,
}

impl Invocation {
    /// Shell-like rendering for logs and `command.txt`.
    pub fn command_line(&self) -> String {
        let mut line = String::new();
        for (key, value) in &self.env {
            line.push_str(&format!("{key}={} ", quote_arg(value)));
        }
        line.push_str(&quote_arg(&self.program));
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// What the external tool reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationResult {
    /// Exit code; `-1` if the process was terminated by a signal.
    pub exit_code: i32,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability interface for running external tools.
///
/// An `Err` means the tool could not be started or waited on at all; a tool
/// that ran and failed is an `Ok` with a non-zero exit code. Dropping the
/// returned future must stop the tool.
pub trait ToolInvoker: Send + Sync + Debug {
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<InvocationResult>> + Send + '_>>;
}

/// Runs tools as child processes.
///
/// stdout and stderr are captured to [`STDOUT_LOG`] / [`STDERR_LOG`] in the
/// working directory and mirrored to the log at debug level.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }
}

impl ToolInvoker for ProcessInvoker {
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<InvocationResult>> + Send + '_>> {
        Box::pin(run_process(invocation))
    }
}

async fn run_process(invocation: Invocation) -> Result<InvocationResult> {
    info!(
        step = %invocation.step,
        cmd = %invocation.command_line(),
        "starting step process"
    );

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(&invocation.env)
        .current_dir(&invocation.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning '{}' for step '{}'", invocation.program, invocation.step))?;

    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let log = invocation.cwd.join(STDOUT_LOG);
        pumps.push(tokio::spawn(pump_lines(
            stdout,
            log,
            invocation.step.clone(),
            "stdout",
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        let log = invocation.cwd.join(STDERR_LOG);
        pumps.push(tokio::spawn(pump_lines(
            stderr,
            log,
            invocation.step.clone(),
            "stderr",
        )));
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of step '{}'", invocation.step))?;

    // Drain the pipes so the log files are complete before outputs are verified.
    for pump in pumps {
        if let Ok(Err(e)) = pump.await {
            debug!(step = %invocation.step, error = %e, "failed to capture process output");
        }
    }

    let exit_code = status.code().unwrap_or(-1);
    info!(
        step = %invocation.step,
        exit_code,
        success = status.success(),
        "step process exited"
    );

    Ok(InvocationResult { exit_code })
}

async fn pump_lines<R>(reader: R, log_path: PathBuf, step: StepId, stream: &'static str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut log = File::create(&log_path)
        .await
        .with_context(|| format!("creating {}", display(&log_path)))?;
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        debug!(step = %step, "{stream}: {}", line);
        log.write_all(line.as_bytes()).await?;
        log.write_all(b"\n").await?;
    }

    log.flush().await?;
    Ok(())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
