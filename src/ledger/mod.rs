// src/ledger/mod.rs

//! Run Ledger: durable record of which `(step, fingerprint)` pairs completed
//! and how.
//!
//! - [`file::FileLedger`] keeps one JSON record per key under
//!   `<work_dir>/ledger` and survives restarts.
//! - [`memory::MemoryLedger`] keeps records in memory, for tests and
//!   throwaway runs.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::StepId;
use crate::errors::{ExecutionError, LedgerError};
use crate::fingerprint::Fingerprint;
use crate::types::LedgerStorageMode;

pub mod file;
pub mod memory;

pub use file::FileLedger;
pub use memory::MemoryLedger;

/// Directory (relative to the work dir) holding file ledger records.
pub const LEDGER_DIR: &str = "ledger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Succeeded,
    Failed,
}

/// One ledger record, keyed by `(step_id, fingerprint)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step_id: StepId,
    pub fingerprint: Fingerprint,
    pub status: LedgerStatus,
    /// Committed output locations by slot name (empty for failures).
    #[serde(default)]
    pub outputs: BTreeMap<String, PathBuf>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl LedgerEntry {
    pub fn succeeded(
        step_id: impl Into<StepId>,
        fingerprint: Fingerprint,
        outputs: BTreeMap<String, PathBuf>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            fingerprint,
            status: LedgerStatus::Succeeded,
            outputs,
            completed_at: Utc::now(),
            failure: None,
        }
    }

    pub fn failed(
        step_id: impl Into<StepId>,
        fingerprint: Fingerprint,
        error: &ExecutionError,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            fingerprint,
            status: LedgerStatus::Failed,
            outputs: BTreeMap::new(),
            completed_at: Utc::now(),
            failure: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LedgerStatus::Succeeded
    }
}

/// Abstract storage for ledger entries.
///
/// Implementations are shared between concurrently completing workers and
/// must serialize writes internally.
pub trait RunLedger: Send + Sync + Debug {
    fn lookup(
        &self,
        step: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Persist an entry.
    ///
    /// A `Succeeded` entry is final: recording anything over it is a no-op.
    /// A `Failed` entry may be replaced by a later attempt.
    fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError>;

    /// Every entry recorded for a step, oldest first.
    fn entries_for(&self, step: &str) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Open the ledger selected by `[config].ledger`.
pub fn open_ledger(
    mode: LedgerStorageMode,
    work_dir: &Path,
) -> Result<Arc<dyn RunLedger>, LedgerError> {
    match mode {
        LedgerStorageMode::File => Ok(Arc::new(FileLedger::open(work_dir.join(LEDGER_DIR))?)),
        LedgerStorageMode::Memory => Ok(Arc::new(MemoryLedger::new())),
    }
}
