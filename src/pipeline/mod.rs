// src/pipeline/mod.rs

//! Built-in pipeline definitions.

pub mod sink;
pub mod tractography;

pub use sink::{derivatives_dir, publish, PublishSummary};
pub use tractography::{build_steps, FinalOutput, Gen5ttAlgorithm, TractParams, FINAL_OUTPUTS};
