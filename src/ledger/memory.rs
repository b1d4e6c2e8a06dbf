// src/ledger/memory.rs

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::dag::StepId;
use crate::errors::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::ledger::{LedgerEntry, RunLedger};

/// Stores ledger entries in memory only.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<(StepId, Fingerprint), LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored `(step, fingerprint)` keys.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, sorted by step id then completion time.
    pub fn all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let map = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        let mut all: Vec<LedgerEntry> = map.values().cloned().collect();
        all.sort_by(|a, b| {
            a.step_id
                .cmp(&b.step_id)
                .then(a.completed_at.cmp(&b.completed_at))
        });
        Ok(all)
    }
}

impl RunLedger for MemoryLedger {
    fn lookup(
        &self,
        step: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let map = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(map.get(&(step.to_string(), fingerprint.clone())).cloned())
    }

    fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut map = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        let key = (entry.step_id.clone(), entry.fingerprint.clone());

        if map.get(&key).is_some_and(LedgerEntry::is_success) {
            debug!(step = %entry.step_id, "ledger already holds a success for this key");
            return Ok(());
        }

        info!(
            step = %entry.step_id,
            fingerprint = %entry.fingerprint.short(),
            status = ?entry.status,
            "recorded ledger entry (memory)"
        );
        map.insert(key, entry);
        Ok(())
    }

    fn entries_for(&self, step: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let map = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        let mut entries: Vec<LedgerEntry> = map
            .values()
            .filter(|e| e.step_id == step)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.completed_at);
        Ok(entries)
    }
}
