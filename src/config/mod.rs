// src/config/mod.rs

//! Pipeline file loading and validation for tractflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate settings and turn `[step.<id>]` tables into step descriptors
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_pipeline_path, load_and_validate, load_from_path};
pub use model::{ConfigSection, PipelineFile, RawConfigSection, RawPipelineFile, StepConfig};
