// src/fingerprint/mod.rs

//! Fingerprint Engine.
//!
//! A step's fingerprint summarises everything that can influence what the
//! step produces: its identity, command template, canonicalised parameters,
//! declared outputs, the content of each external input, and the fingerprints
//! of its upstream producers. Equal fingerprints license skipping.
//!
//! - [`canonical`] encodes parameters independent of map order.
//! - [`hash`] hashes files and directory trees with BLAKE3.
//! - [`cache`] memoizes external input digests within a run.
//! - [`engine`] computes per-step and per-graph fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod canonical;
pub mod engine;
pub mod hash;

pub use cache::FileCache;
pub use engine::{FingerprintEngine, FingerprintReport, Unavailability};

/// Hex-encoded BLAKE3 digest identifying one effective configuration of a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading 16 hex chars, used in scratch directory names and log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(16);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
