// src/config/validate.rs

use std::path::PathBuf;

use crate::config::model::{
    ConfigSection, PipelineFile, RawConfigSection, RawPipelineFile, StepConfig, STEP_REF_PREFIX,
};
use crate::dag::{CommandTemplate, StepDescriptor};
use crate::engine::default_jobs;
use crate::errors::{Result, TractflowError};
use crate::types::parse_duration;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = crate::errors::TractflowError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_steps(&raw)?;
        let config = validate_global_config(&raw.config)?;

        let mut steps = Vec::with_capacity(raw.step.len());
        for (id, step) in raw.step {
            steps.push(step_descriptor(id, step)?);
        }

        Ok(PipelineFile::new_unchecked(config, steps))
    }
}

fn ensure_has_steps(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Err(TractflowError::ConfigError(
            "pipeline must contain at least one [step.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigSection) -> Result<ConfigSection> {
    let jobs = match cfg.jobs {
        Some(0) => {
            return Err(TractflowError::ConfigError(
                "[config].jobs must be >= 1 (got 0)".to_string(),
            ));
        }
        Some(n) => n,
        None => default_jobs(),
    };

    let step_timeout = cfg
        .step_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| TractflowError::ConfigError(format!("[config].step_timeout: {e}")))?;

    Ok(ConfigSection {
        jobs,
        work_dir: cfg.work_dir.clone(),
        ledger: cfg.ledger,
        staging: cfg.staging,
        step_timeout,
    })
}

fn step_descriptor(id: String, cfg: StepConfig) -> Result<StepDescriptor> {
    if cfg.program.trim().is_empty() {
        return Err(TractflowError::ConfigError(format!(
            "step '{id}' has an empty `program`"
        )));
    }

    let mut command = CommandTemplate::new(cfg.program).args(cfg.args);
    for (key, value) in cfg.env {
        command = command.env(key, value);
    }

    let mut step = StepDescriptor::new(id, command);
    step.parameters = cfg.params;

    if let Some(timeout) = cfg.timeout.as_deref() {
        let timeout = parse_duration(timeout).map_err(|e| {
            TractflowError::ConfigError(format!("step '{}' timeout: {e}", step.id))
        })?;
        step = step.timeout(timeout);
    }

    for (name, source) in cfg.inputs {
        step = match source.strip_prefix(STEP_REF_PREFIX) {
            Some(reference) => {
                let (producer, output) = parse_step_ref(reference).ok_or_else(|| {
                    TractflowError::ConfigError(format!(
                        "step '{}' input '{name}': expected \"@<step>.<output>\", got {source:?}",
                        step.id
                    ))
                })?;
                step.step_input(name, producer, output)
            }
            None => step.external_input(name, PathBuf::from(source.as_str())),
        };
    }

    for (name, path) in cfg.outputs {
        step = step.output(name, path);
    }

    Ok(step)
}

/// Split `"<step>.<output>"`; step ids may themselves contain dots.
fn parse_step_ref(reference: &str) -> Option<(&str, &str)> {
    let (producer, output) = reference.rsplit_once('.')?;
    if producer.is_empty() || output.is_empty() {
        return None;
    }
    Some((producer, output))
}
