// src/ledger/file.rs

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::errors::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::fs::safe_component;
use crate::ledger::{LedgerEntry, RunLedger};

/// Stores one JSON record per `(step, fingerprint)`:
///
/// `<root>/<step>/<fingerprint>.json`
///
/// Records are written to a temporary sibling and renamed into place, so a
/// reader never observes a partial record. Writes are serialized by a mutex.
#[derive(Debug)]
pub struct FileLedger {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLedger {
    /// Open (creating if necessary) a ledger rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| LedgerError::Io {
            path: root.clone(),
            source,
        })?;
        debug!(root = ?root, "opened file ledger");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn step_dir(&self, step: &str) -> PathBuf {
        self.root.join(safe_component(step))
    }

    fn entry_path(&self, step: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.step_dir(step)
            .join(format!("{}.json", safe_component(fingerprint.as_str())))
    }
}

impl RunLedger for FileLedger {
    fn lookup(
        &self,
        step: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let path = self.entry_path(step, fingerprint);
        if !path.exists() {
            return Ok(None);
        }

        let entry = read_entry(&path)?;
        if entry.step_id != step || &entry.fingerprint != fingerprint {
            return Err(LedgerError::Corrupt {
                path,
                reason: format!(
                    "record is for ({}, {}), expected ({}, {})",
                    entry.step_id, entry.fingerprint, step, fingerprint
                ),
            });
        }
        Ok(Some(entry))
    }

    fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().map_err(|_| LedgerError::Poisoned)?;

        let path = self.entry_path(&entry.step_id, &entry.fingerprint);
        if path.exists() && read_entry(&path)?.is_success() {
            debug!(step = %entry.step_id, "ledger already holds a success for this key");
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(&entry).map_err(|e| LedgerError::Serialize {
            step: entry.step_id.clone(),
            reason: e.to_string(),
        })?;
        atomic_write(&path, &bytes)?;

        info!(
            step = %entry.step_id,
            fingerprint = %entry.fingerprint.short(),
            status = ?entry.status,
            "recorded ledger entry (file)"
        );
        Ok(())
    }

    fn entries_for(&self, step: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let dir = self.step_dir(step);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let read = fs::read_dir(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for item in read {
            let item = item.map_err(|source| LedgerError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                entries.push(read_entry(&path)?);
            }
        }

        entries.sort_by_key(|e| e.completed_at);
        Ok(entries)
    }
}

fn read_entry(path: &Path) -> Result<LedgerEntry, LedgerError> {
    let bytes = fs::read(path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| LedgerError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));

    let mut file = File::create(&tmp).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
