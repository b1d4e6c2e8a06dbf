// src/pipeline/tractography.rs

//! Single subject/session tractography workflow.
//!
//! Skull-strip the T1, register it to diffusion space, segment it into five
//! tissue types, estimate fibre orientations, track and filter streamlines,
//! bring the atlas into diffusion space and build two connectivity matrices.

use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::dag::{CommandTemplate, StepDescriptor, StepId};
use crate::errors::{Result, TractflowError};

pub const DEFAULT_NUM_TRACTS: u32 = 50_000;
pub const DEFAULT_SUBJECT: &str = "001";
pub const DEFAULT_SESSION: &str = "01";

/// Algorithm handed to `5ttgen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Gen5ttAlgorithm {
    #[default]
    Fsl,
    Freesurfer,
}

impl Gen5ttAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gen5ttAlgorithm::Fsl => "fsl",
            Gen5ttAlgorithm::Freesurfer => "freesurfer",
        }
    }
}

/// Inputs of one subject/session run.
#[derive(Debug, Clone, PartialEq)]
pub struct TractParams {
    /// Participant label without the `sub-` prefix.
    pub subject: String,
    /// Session label without the `ses-` prefix.
    pub session: String,
    pub t1: PathBuf,
    /// Eddy-corrected diffusion series.
    pub eddy: PathBuf,
    pub eddy_avg_b0: PathBuf,
    pub eddy_mask: PathBuf,
    pub bvec: PathBuf,
    pub bval: PathBuf,
    /// Template the T1 is registered to before bringing the atlas across.
    pub template: PathBuf,
    /// Parcellation in template space.
    pub atlas: PathBuf,
    pub gen5tt: Gen5ttAlgorithm,
    /// Subject aseg, required by the freesurfer algorithm.
    pub fs_file: Option<PathBuf>,
    pub num_tracts: u32,
}

impl TractParams {
    /// Prefix shared by every step id of this subject/session.
    pub fn step_prefix(&self) -> String {
        format!("sub-{}_ses-{}", self.subject, self.session)
    }

    pub fn step_id(&self, name: &str) -> StepId {
        format!("{}.{name}", self.step_prefix())
    }
}

/// A workflow output copied into the derivatives folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalOutput {
    /// Step name without the subject/session prefix.
    pub step: &'static str,
    pub output: &'static str,
}

/// The outputs published after a run.
pub const FINAL_OUTPUTS: &[FinalOutput] = &[
    FinalOutput { step: "fod_convert", output: "converted" },
    FinalOutput { step: "gmwmi_convert", output: "converted" },
    FinalOutput { step: "tcksift2", output: "out_weights" },
    FinalOutput { step: "atlas_flirt", output: "out_file" },
    FinalOutput { step: "conmat_invlen", output: "out_file" },
    FinalOutput { step: "conmat_length", output: "out_file" },
];

/// Build the step descriptors for one subject/session.
pub fn build_steps(params: &TractParams) -> Result<Vec<StepDescriptor>> {
    let id = |name: &str| params.step_id(name);

    let t1_skullstrip = StepDescriptor::new(
        id("t1_skullstrip"),
        CommandTemplate::new("bet").args([
            "{inputs.in_file}",
            "{outputs.out_file}",
            "-f",
            "{params.frac}",
        ]),
    )
    .param("frac", 0.5)
    .external_input("in_file", &params.t1)
    .output("out_file", "T1w_brain.nii.gz");

    let t1_flirt = StepDescriptor::new(
        id("t1_flirt"),
        CommandTemplate::new("flirt").args([
            "-in",
            "{inputs.in_file}",
            "-ref",
            "{inputs.reference}",
            "-dof",
            "{params.dof}",
            "-omat",
            "{outputs.out_matrix_file}",
            "-out",
            "{outputs.out_file}",
        ]),
    )
    .param("dof", 6)
    .step_input("in_file", id("t1_skullstrip"), "out_file")
    .external_input("reference", &params.eddy_avg_b0)
    .output("out_file", "T1_diff.nii.gz")
    .output("out_matrix_file", "xformT1_2_diff.mat");

    let gen5tt = gen5tt_step(params)?;

    let gen5tt_mask = StepDescriptor::new(
        id("gen5tt_mask"),
        CommandTemplate::new("5tt2gmwmi").args(["{inputs.in_file}", "{outputs.out_file}"]),
    )
    .step_input("in_file", id("gen5tt"), "out_file")
    .output("out_file", "gmwmi.mif");

    let response_sd = StepDescriptor::new(
        id("response_sd"),
        CommandTemplate::new("dwi2response").args([
            "{params.algorithm}",
            "{inputs.in_file}",
            "{outputs.wm_file}",
            "-mask",
            "{inputs.in_mask}",
            "-fslgrad",
            "{inputs.bvec}",
            "{inputs.bval}",
        ]),
    )
    .param("algorithm", "tournier")
    .external_input("in_file", &params.eddy)
    .external_input("in_mask", &params.eddy_mask)
    .external_input("bvec", &params.bvec)
    .external_input("bval", &params.bval)
    .output("wm_file", "response.txt");

    let estimate_fod = StepDescriptor::new(
        id("estimate_fod"),
        CommandTemplate::new("dwi2fod").args([
            "{params.algorithm}",
            "{inputs.in_file}",
            "{inputs.wm_txt}",
            "{outputs.wm_odf}",
            "-mask",
            "{inputs.mask_file}",
            "-fslgrad",
            "{inputs.bvec}",
            "{inputs.bval}",
        ]),
    )
    .param("algorithm", "csd")
    .external_input("in_file", &params.eddy)
    .step_input("wm_txt", id("response_sd"), "wm_file")
    .external_input("mask_file", &params.eddy_mask)
    .external_input("bvec", &params.bvec)
    .external_input("bval", &params.bval)
    .output("wm_odf", "FOD.mif");

    let tckgen = StepDescriptor::new(
        id("tckgen"),
        CommandTemplate::new("tckgen").args([
            "{inputs.in_file}",
            "{outputs.out_file}",
            "-act",
            "{inputs.act_file}",
            "-seed_gmwmi",
            "{inputs.seed_gmwmi}",
            "-select",
            "{params.select}",
        ]),
    )
    .param("select", params.num_tracts)
    .step_input("in_file", id("estimate_fod"), "wm_odf")
    .step_input("act_file", id("gen5tt"), "out_file")
    .step_input("seed_gmwmi", id("gen5tt_mask"), "out_file")
    .output("out_file", "prob.tck");

    let tcksift2 = StepDescriptor::new(
        id("tcksift2"),
        CommandTemplate::new("tcksift2").args([
            "{inputs.in_tracks}",
            "{inputs.in_fod}",
            "{outputs.out_weights}",
        ]),
    )
    .step_input("in_tracks", id("tckgen"), "out_file")
    .step_input("in_fod", id("estimate_fod"), "wm_odf")
    .output("out_weights", "prob_weights.txt");

    let pre_atlas_flirt = StepDescriptor::new(
        id("pre_atlas_flirt"),
        CommandTemplate::new("flirt").args([
            "-in",
            "{inputs.in_file}",
            "-ref",
            "{inputs.reference}",
            "-omat",
            "{outputs.out_matrix_file}",
        ]),
    )
    .step_input("in_file", id("t1_skullstrip"), "out_file")
    .external_input("reference", &params.template)
    .output("out_matrix_file", "xformT1_2_MNI.mat");

    let xfm_inv = StepDescriptor::new(
        id("xfm_inv"),
        CommandTemplate::new("convert_xfm").args([
            "-omat",
            "{outputs.out_file}",
            "-inverse",
            "{inputs.in_file}",
        ]),
    )
    .step_input("in_file", id("pre_atlas_flirt"), "out_matrix_file")
    .output("out_file", "xformMNI_2_T1.mat");

    // -concat B A yields A followed by B: template -> T1 -> diffusion.
    let xfm_concat = StepDescriptor::new(
        id("xfm_concat"),
        CommandTemplate::new("convert_xfm").args([
            "-omat",
            "{outputs.out_file}",
            "-concat",
            "{inputs.t1_to_diff}",
            "{inputs.template_to_t1}",
        ]),
    )
    .step_input("t1_to_diff", id("t1_flirt"), "out_matrix_file")
    .step_input("template_to_t1", id("xfm_inv"), "out_file")
    .output("out_file", "xformMNI_2_diff.mat");

    let atlas_flirt = StepDescriptor::new(
        id("atlas_flirt"),
        CommandTemplate::new("flirt").args([
            "-in",
            "{inputs.in_file}",
            "-ref",
            "{inputs.reference}",
            "-applyxfm",
            "-init",
            "{inputs.in_matrix_file}",
            "-interp",
            "{params.interp}",
            "-out",
            "{outputs.out_file}",
        ]),
    )
    .param("interp", "nearestneighbour")
    .external_input("in_file", &params.atlas)
    .step_input("reference", id("t1_flirt"), "out_file")
    .step_input("in_matrix_file", id("xfm_concat"), "out_file")
    .output("out_file", "shen_diff_space.nii.gz");

    let conmat_invlen = StepDescriptor::new(
        id("conmat_invlen"),
        CommandTemplate::new("tck2connectome").args([
            "{inputs.in_file}",
            "{inputs.in_parc}",
            "{outputs.out_file}",
            "-scale_invlength",
            "-zero_diagonal",
            "-symmetric",
            "-tck_weights_in",
            "{inputs.in_weights}",
            "-assignment_radial_search",
            "{params.search_radius}",
            "-scale_invnodevol",
        ]),
    )
    .param("search_radius", 2)
    .step_input("in_file", id("tckgen"), "out_file")
    .step_input("in_parc", id("atlas_flirt"), "out_file")
    .step_input("in_weights", id("tcksift2"), "out_weights")
    .output("out_file", "conmat_shen.csv");

    let conmat_length = StepDescriptor::new(
        id("conmat_length"),
        CommandTemplate::new("tck2connectome").args([
            "{inputs.in_file}",
            "{inputs.in_parc}",
            "{outputs.out_file}",
            "-zero_diagonal",
            "-symmetric",
            "-scale_length",
            "-stat_edge",
            "{params.stat_edge}",
            "-assignment_radial_search",
            "{params.search_radius}",
        ]),
    )
    .param("search_radius", 2)
    .param("stat_edge", "mean")
    .step_input("in_file", id("tckgen"), "out_file")
    .step_input("in_parc", id("atlas_flirt"), "out_file")
    .output("out_file", "conmat_length_shen.csv");

    let fod_convert = mrconvert(id("fod_convert"), id("estimate_fod"), "wm_odf", "FOD.nii.gz");
    let gmwmi_convert = mrconvert(
        id("gmwmi_convert"),
        id("gen5tt_mask"),
        "out_file",
        "gmwmi.nii.gz",
    );

    Ok(vec![
        t1_skullstrip,
        t1_flirt,
        gen5tt,
        gen5tt_mask,
        response_sd,
        estimate_fod,
        tckgen,
        tcksift2,
        pre_atlas_flirt,
        xfm_inv,
        xfm_concat,
        atlas_flirt,
        conmat_invlen,
        conmat_length,
        fod_convert,
        gmwmi_convert,
    ])
}

/// `5ttgen` on the registered T1, or on the subject aseg for freesurfer.
fn gen5tt_step(params: &TractParams) -> Result<StepDescriptor> {
    let id = params.step_id("gen5tt");
    let algorithm = params.gen5tt;

    match algorithm {
        Gen5ttAlgorithm::Fsl => Ok(StepDescriptor::new(
            id,
            CommandTemplate::new("5ttgen").args([
                "{params.algorithm}",
                "-nocrop",
                "-premasked",
                "{inputs.in_file}",
                "{outputs.out_file}",
            ]),
        )
        .param("algorithm", algorithm.as_str())
        .step_input("in_file", params.step_id("t1_flirt"), "out_file")
        .output("out_file", "5TT.mif")),
        Gen5ttAlgorithm::Freesurfer => {
            let fs_file = params.fs_file.as_deref().ok_or_else(|| {
                TractflowError::ConfigError(
                    "--fs-file is required with --gen5tt-algo freesurfer".to_string(),
                )
            })?;

            Ok(StepDescriptor::new(
                id,
                CommandTemplate::new("5ttgen")
                    .args([
                        "{params.algorithm}",
                        "-nocrop",
                        "{inputs.in_file}",
                        "{outputs.out_file}",
                    ])
                    .env("SUBJECTS_DIR", subjects_dir(fs_file)),
            )
            .param("algorithm", algorithm.as_str())
            .external_input("in_file", fs_file)
            .output("out_file", "5TT.mif"))
        }
    }
}

/// `SUBJECTS_DIR` from the environment, else the aseg's directory.
fn subjects_dir(fs_file: &Path) -> String {
    match std::env::var("SUBJECTS_DIR") {
        Ok(dir) if !dir.is_empty() => dir,
        _ => fs_file
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string()),
    }
}

fn mrconvert(id: StepId, producer: StepId, output: &str, file_name: &str) -> StepDescriptor {
    StepDescriptor::new(
        id,
        CommandTemplate::new("mrconvert").args(["{inputs.in_file}", "{outputs.converted}"]),
    )
    .step_input("in_file", producer, output)
    .output("converted", file_name)
}
