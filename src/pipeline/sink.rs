// src/pipeline/sink.rs

//! Copy the final outputs of a tractography run into the derivatives tree.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::engine::RunReport;
use crate::errors::Result;
use crate::pipeline::tractography::{TractParams, FINAL_OUTPUTS};

/// Result of publishing a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSummary {
    pub destination: PathBuf,
    pub copied: Vec<PathBuf>,
    /// `<step>.<output>` for outputs the run did not produce.
    pub missing: Vec<String>,
}

/// `<output_dir>/tractify/sub-<s>/ses-<ss>/dwi`.
pub fn derivatives_dir(output_dir: &Path, subject: &str, session: &str) -> PathBuf {
    output_dir
        .join("tractify")
        .join(format!("sub-{subject}"))
        .join(format!("ses-{session}"))
        .join("dwi")
}

/// Copy every final output that the run committed.
///
/// Outputs of failed or skipped steps, and outputs that could not be
/// copied, are listed in `missing`. Only failing to create the destination
/// is an error.
pub fn publish(report: &RunReport, params: &TractParams, output_dir: &Path) -> Result<PublishSummary> {
    let destination = derivatives_dir(output_dir, &params.subject, &params.session);
    fs::create_dir_all(&destination)
        .with_context(|| format!("creating {}", destination.display()))?;

    let mut summary = PublishSummary {
        destination: destination.clone(),
        ..PublishSummary::default()
    };

    for wanted in FINAL_OUTPUTS {
        let step_id = params.step_id(wanted.step);
        let source = report
            .step(&step_id)
            .and_then(|step| step.outputs.get(wanted.output));

        let Some(source) = source else {
            warn!(step = %step_id, output = wanted.output, "final output not produced");
            summary.missing.push(format!("{step_id}.{}", wanted.output));
            continue;
        };

        let Some(file_name) = source.file_name() else {
            summary.missing.push(format!("{step_id}.{}", wanted.output));
            continue;
        };

        let target = destination.join(file_name);
        if let Err(err) = fs::copy(source, &target) {
            warn!(
                step = %step_id,
                output = wanted.output,
                from = %source.display(),
                to = %target.display(),
                error = %err,
                "failed to copy final output"
            );
            summary.missing.push(format!("{step_id}.{}", wanted.output));
            continue;
        }
        summary.copied.push(target);
    }

    info!(
        destination = %destination.display(),
        copied = summary.copied.len(),
        missing = summary.missing.len(),
        "published final outputs"
    );
    Ok(summary)
}
