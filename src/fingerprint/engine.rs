// src/fingerprint/engine.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use blake3::Hasher;
use tracing::{debug, warn};

use crate::dag::{InputSource, StepDescriptor, StepGraph, StepId};
use crate::errors::InputUnavailable;
use crate::fingerprint::cache::FileCache;
use crate::fingerprint::canonical::canonical_params;
use crate::fingerprint::hash::update_field;
use crate::fingerprint::Fingerprint;
use crate::fs::FileSystem;

const DOMAIN: &[u8] = b"tractflow-fingerprint-v1";

/// Why a step could not be fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailability {
    /// One of the step's own external inputs is missing or unreadable.
    Input(InputUnavailable),
    /// A producer step could not be fingerprinted.
    Upstream(StepId),
}

/// Fingerprints for every step of a graph that could be fingerprinted.
#[derive(Debug, Clone, Default)]
pub struct FingerprintReport {
    pub fingerprints: HashMap<StepId, Fingerprint>,
    pub unavailable: HashMap<StepId, Unavailability>,
}

impl FingerprintReport {
    pub fn fingerprint_of(&self, step: &str) -> Option<&Fingerprint> {
        self.fingerprints.get(step)
    }

    pub fn unavailability_of(&self, step: &str) -> Option<&Unavailability> {
        self.unavailable.get(step)
    }
}

/// Computes step fingerprints, reading external inputs through a
/// [`FileSystem`].
#[derive(Debug)]
pub struct FingerprintEngine {
    fs: Arc<dyn FileSystem>,
    cache: FileCache,
}

impl FingerprintEngine {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            cache: FileCache::new(),
        }
    }

    /// Fingerprint a single step given the fingerprints of its producers.
    pub fn fingerprint(
        &mut self,
        step: &StepDescriptor,
        upstream: &HashMap<StepId, Fingerprint>,
    ) -> Result<Fingerprint, InputUnavailable> {
        let mut hasher = Hasher::new();
        update_field(&mut hasher, DOMAIN);
        update_field(&mut hasher, step.id.as_bytes());

        update_field(&mut hasher, step.command.program.as_bytes());
        update_field(&mut hasher, &(step.command.args.len() as u64).to_le_bytes());
        for arg in &step.command.args {
            update_field(&mut hasher, arg.as_bytes());
        }
        update_field(&mut hasher, &(step.command.env.len() as u64).to_le_bytes());
        for (key, value) in &step.command.env {
            update_field(&mut hasher, key.as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }

        update_field(&mut hasher, canonical_params(&step.parameters).as_bytes());

        update_field(&mut hasher, &(step.inputs.len() as u64).to_le_bytes());
        for input in &step.inputs {
            update_field(&mut hasher, input.name.as_bytes());
            match &input.source {
                InputSource::External(path) => {
                    let digest = self.external_digest(step, &input.name, path)?;
                    update_field(&mut hasher, b"external");
                    update_field(&mut hasher, digest.as_bytes());
                }
                InputSource::Step {
                    step: producer,
                    output,
                } => {
                    let Some(fp) = upstream.get(producer) else {
                        return Err(InputUnavailable {
                            step: step.id.clone(),
                            input: input.name.clone(),
                            path: Path::new(producer).to_path_buf(),
                            reason: format!("producer step '{producer}' has no fingerprint"),
                        });
                    };
                    update_field(&mut hasher, b"step");
                    update_field(&mut hasher, fp.as_str().as_bytes());
                    update_field(&mut hasher, output.as_bytes());
                }
            }
        }

        update_field(&mut hasher, &(step.outputs.len() as u64).to_le_bytes());
        for slot in &step.outputs {
            update_field(&mut hasher, slot.name.as_bytes());
            update_field(&mut hasher, slot.path.to_string_lossy().as_bytes());
        }

        let fp = Fingerprint::from_hex(hasher.finalize().to_hex().to_string());
        debug!(step = %step.id, fingerprint = %fp.short(), "computed fingerprint");
        Ok(fp)
    }

    /// Fingerprint every step of `graph` in topological order.
    ///
    /// Steps with an unavailable external input, and every step downstream of
    /// them, end up in [`FingerprintReport::unavailable`].
    pub fn fingerprint_graph(&mut self, graph: &StepGraph) -> FingerprintReport {
        let mut report = FingerprintReport::default();

        for step in graph.descriptors() {
            let blocked = graph
                .dependencies_of(&step.id)
                .iter()
                .find(|dep| report.unavailable.contains_key(dep.as_str()))
                .cloned();

            if let Some(producer) = blocked {
                debug!(step = %step.id, upstream = %producer, "upstream unavailable");
                report
                    .unavailable
                    .insert(step.id.clone(), Unavailability::Upstream(producer));
                continue;
            }

            match self.fingerprint(step, &report.fingerprints) {
                Ok(fp) => {
                    report.fingerprints.insert(step.id.clone(), fp);
                }
                Err(err) => {
                    warn!(
                        step = %step.id,
                        input = %err.input,
                        path = ?err.path,
                        reason = %err.reason,
                        "input unavailable; step and dependents will be skipped"
                    );
                    report
                        .unavailable
                        .insert(step.id.clone(), Unavailability::Input(err));
                }
            }
        }

        report
    }

    fn external_digest(
        &mut self,
        step: &StepDescriptor,
        input: &str,
        path: &Path,
    ) -> Result<String, InputUnavailable> {
        let unavailable = |reason: String| InputUnavailable {
            step: step.id.clone(),
            input: input.to_string(),
            path: path.to_path_buf(),
            reason,
        };

        if !self.fs.exists(path) {
            return Err(unavailable("no such file or directory".to_string()));
        }

        self.cache
            .get_or_compute(self.fs.as_ref(), path)
            .map_err(|e| unavailable(format!("{e:#}")))
    }
}
