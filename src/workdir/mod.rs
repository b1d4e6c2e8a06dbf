// src/workdir/mod.rs

//! Working-Directory Manager.
//!
//! Every attempt of a step runs in its own scratch directory:
//!
//! `<root>/scratch/<step>/<fingerprint16>-<attempt>/`
//!
//! Inputs are staged under `inputs/<name>/`, the command runs with the
//! scratch directory as its cwd, and after every declared output has been
//! verified the whole directory is renamed to
//!
//! `<root>/committed/<step>/<fingerprint>/`
//!
//! Failed attempts stay in `scratch/` untouched.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dag::{ScheduledStep, StepDescriptor};
use crate::errors::ExecutionError;
use crate::exec::process::{Invocation, ToolInvoker};
use crate::exec::template::{render, TemplateContext};
use crate::fingerprint::Fingerprint;
use crate::fs::safe_component;
use crate::types::StagingPolicy;

pub const SCRATCH_DIR: &str = "scratch";
pub const COMMITTED_DIR: &str = "committed";
pub const INPUTS_DIR: &str = "inputs";
/// Rendered command line, written into each scratch directory.
pub const COMMAND_FILE: &str = "command.txt";

#[derive(Debug, Clone)]
pub struct WorkdirManager {
    root: PathBuf,
    staging: StagingPolicy,
    default_timeout: Option<Duration>,
}

impl WorkdirManager {
    /// `root` is made absolute so rendered paths stay valid from inside the
    /// scratch directory.
    pub fn new(root: impl Into<PathBuf>, staging: StagingPolicy) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self {
            root,
            staging,
            default_timeout: None,
        }
    }

    /// Timeout applied to steps that do not declare their own.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch_root(&self, step: &str) -> PathBuf {
        self.root.join(SCRATCH_DIR).join(safe_component(step))
    }

    pub fn committed_dir(&self, step: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(COMMITTED_DIR)
            .join(safe_component(step))
            .join(fingerprint.as_str())
    }

    /// Create a fresh scratch directory for one attempt.
    ///
    /// The attempt number is the first one whose directory does not exist
    /// yet, so earlier attempts are never reused.
    pub fn allocate(&self, step: &str, fingerprint: &Fingerprint) -> Result<PathBuf, ExecutionError> {
        let base = self.scratch_root(step);
        fs::create_dir_all(&base).map_err(|e| workdir_err(&base, e))?;

        let mut attempt: u32 = 1;
        loop {
            let dir = base.join(format!("{}-{}", fingerprint.short(), attempt));
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!(step = %step, attempt, dir = ?dir, "allocated scratch directory");
                    return Ok(dir);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(workdir_err(&dir, e)),
            }
        }
    }

    /// Place every resolved input under `<scratch>/inputs/<name>/`.
    ///
    /// Returns the staged location of each input.
    pub fn stage(
        &self,
        scratch: &Path,
        inputs: &BTreeMap<String, PathBuf>,
    ) -> Result<BTreeMap<String, PathBuf>, ExecutionError> {
        let mut staged = BTreeMap::new();

        for (name, source) in inputs {
            let staging_err = |reason: String| ExecutionError::Staging {
                input: name.clone(),
                reason,
            };

            let dir = scratch.join(INPUTS_DIR).join(safe_component(name));
            fs::create_dir_all(&dir).map_err(|e| staging_err(e.to_string()))?;

            let file_name = source
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| safe_component(name).into());
            let dest = dir.join(file_name);

            let source = std::path::absolute(source).unwrap_or_else(|_| source.clone());
            if !source.exists() {
                return Err(staging_err(format!("{:?} does not exist", source)));
            }

            let placed = match self.staging {
                StagingPolicy::Symlink => link_or_copy(&source, &dest),
                StagingPolicy::Copy => copy_recursive(&source, &dest),
            };
            placed.map_err(|e| staging_err(format!("{:?} -> {:?}: {e}", source, dest)))?;

            debug!(input = %name, from = ?source, to = ?dest, "staged input");
            staged.insert(name.clone(), dest);
        }

        Ok(staged)
    }

    /// Check that every declared output exists and is non-empty.
    pub fn verify_outputs(
        &self,
        scratch: &Path,
        descriptor: &StepDescriptor,
    ) -> Result<(), ExecutionError> {
        for slot in &descriptor.outputs {
            let path = scratch.join(&slot.path);
            if !is_non_empty(&path) {
                warn!(
                    step = %descriptor.id,
                    output = %slot.name,
                    path = ?path,
                    "declared output missing or empty"
                );
                return Err(ExecutionError::MissingOutput {
                    output: slot.name.clone(),
                    path,
                });
            }
        }
        Ok(())
    }

    /// Publish a verified scratch directory as the committed result.
    ///
    /// A committed directory already present for the same key (left by a
    /// run that crashed between commit and ledger write) is replaced.
    pub fn commit(
        &self,
        scratch: &Path,
        descriptor: &StepDescriptor,
        fingerprint: &Fingerprint,
    ) -> Result<BTreeMap<String, PathBuf>, ExecutionError> {
        let target = self.committed_dir(&descriptor.id, fingerprint);
        let commit_err = |e: io::Error| ExecutionError::Commit(format!("{:?}: {e}", target));

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(commit_err)?;
        }
        if target.exists() {
            warn!(step = %descriptor.id, dir = ?target, "replacing stale committed directory");
            fs::remove_dir_all(&target).map_err(commit_err)?;
        }
        fs::rename(scratch, &target).map_err(commit_err)?;

        info!(step = %descriptor.id, dir = ?target, "committed step outputs");

        Ok(descriptor
            .outputs
            .iter()
            .map(|slot| (slot.name.clone(), target.join(&slot.path)))
            .collect())
    }

    /// Allocate, stage, invoke, verify and commit one step.
    ///
    /// Filesystem work runs on the blocking pool; large inputs staged with
    /// [`StagingPolicy::Copy`] would otherwise stall the runtime. On any
    /// error the scratch directory is left in place.
    pub async fn stage_and_run(
        &self,
        step: &ScheduledStep,
        invoker: &dyn ToolInvoker,
    ) -> Result<BTreeMap<String, PathBuf>, ExecutionError> {
        let (scratch, invocation) = {
            let manager = self.clone();
            let step = step.clone();
            blocking(move || manager.prepare(&step)).await?
        };

        let program = invocation.program.clone();
        let result = match step.descriptor.timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, invoker.invoke(invocation)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(step = %step.id, timeout = ?limit, "step timed out; process killed");
                    return Err(ExecutionError::TimedOut { after: limit });
                }
            },
            None => invoker.invoke(invocation).await,
        }
        .map_err(|e| ExecutionError::Spawn {
            program,
            reason: format!("{e:#}"),
        })?;

        if !result.success() {
            return Err(ExecutionError::NonZeroExit {
                code: result.exit_code,
            });
        }

        let manager = self.clone();
        let step = step.clone();
        blocking(move || {
            manager.verify_outputs(&scratch, &step.descriptor)?;
            manager.commit(&scratch, &step.descriptor, &step.fingerprint)
        })
        .await
    }

    /// Allocate a scratch directory, stage inputs and render the command.
    ///
    /// The rendered command line is also written to [`COMMAND_FILE`].
    fn prepare(&self, step: &ScheduledStep) -> Result<(PathBuf, Invocation), ExecutionError> {
        let descriptor = &step.descriptor;
        let scratch = self.allocate(&step.id, &step.fingerprint)?;
        let staged = self.stage(&scratch, &step.inputs)?;

        let mut outputs = BTreeMap::new();
        for slot in &descriptor.outputs {
            let path = scratch.join(&slot.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| workdir_err(parent, e))?;
            }
            outputs.insert(slot.name.clone(), path);
        }

        let ctx = TemplateContext {
            inputs: staged.clone(),
            outputs: outputs.clone(),
            params: Some(&descriptor.parameters),
        };
        let invocation = Invocation {
            step: step.id.clone(),
            program: render(&descriptor.command.program, &ctx),
            args: descriptor
                .command
                .args
                .iter()
                .map(|a| render(a, &ctx))
                .collect(),
            env: descriptor
                .command
                .env
                .iter()
                .map(|(k, v)| (k.clone(), render(v, &ctx)))
                .collect(),
            cwd: scratch.clone(),
            inputs: staged,
            outputs,
        };

        let command_file = scratch.join(COMMAND_FILE);
        fs::write(&command_file, format!("{}\n", invocation.command_line()))
            .map_err(|e| workdir_err(&command_file, e))?;

        Ok((scratch, invocation))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ExecutionError>
where
    F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExecutionError::Workdir(format!("filesystem task failed: {e}")))?
}

fn workdir_err(path: &Path, e: io::Error) -> ExecutionError {
    ExecutionError::Workdir(format!("{:?}: {e}", path))
}

/// Regular file with size > 0, or a directory with at least one entry.
fn is_non_empty(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() > 0,
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(unix)]
fn link_or_copy(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, dest: &Path) -> io::Result<()> {
    copy_recursive(source, dest)
}

fn copy_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    if source.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, dest).map(|_| ())
    }
}
