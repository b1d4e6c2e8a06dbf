// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{PipelineFile, RawPipelineFile, STEP_REF_PREFIX};
use crate::dag::build_graph;
use crate::errors::Result;

/// Default pipeline file name in the current working directory.
pub const DEFAULT_PIPELINE_FILE: &str = "Tractflow.toml";

/// Load a pipeline file from a given path and return the raw `RawPipelineFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let pipeline: RawPipelineFile = toml::from_str(&contents)?;

    Ok(pipeline)
}

/// Load a pipeline file from path and validate it.
///
/// - Reads TOML.
/// - Resolves relative external inputs and `work_dir` against the directory
///   containing the file.
/// - Checks global config sanity and converts steps into descriptors.
/// - Builds the step graph once, so graph errors surface at load time.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineFile> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;
    resolve_relative_paths(&mut raw, &config_base_dir(path));

    let pipeline = PipelineFile::try_from(raw)?;
    let graph = build_graph(pipeline.steps.clone())?;
    debug!(path = ?path, steps = graph.len(), "loaded pipeline file");

    Ok(pipeline)
}

/// Helper to resolve the default pipeline path.
pub fn default_pipeline_path() -> PathBuf {
    PathBuf::from(DEFAULT_PIPELINE_FILE)
}

/// Directory relative paths in a pipeline file are interpreted against.
///
/// A bare file name (parent = "") means the current working directory.
fn config_base_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn resolve_relative_paths(raw: &mut RawPipelineFile, base: &Path) {
    if raw.config.work_dir.is_relative() {
        raw.config.work_dir = base.join(&raw.config.work_dir);
    }

    for step in raw.step.values_mut() {
        for source in step.inputs.values_mut() {
            if source.starts_with(STEP_REF_PREFIX) {
                continue;
            }
            let path = Path::new(source.as_str());
            if path.is_relative() {
                *source = base.join(path).to_string_lossy().into_owned();
            }
        }
    }
}
