// tests/ledger.rs

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::tempdir;
use tractflow::errors::{ExecutionError, LedgerError};
use tractflow::fingerprint::Fingerprint;
use tractflow::ledger::{
    open_ledger, FileLedger, LedgerEntry, LedgerStatus, MemoryLedger, RunLedger, LEDGER_DIR,
};
use tractflow::types::LedgerStorageMode;
use tractflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn fp(seed: &str) -> Fingerprint {
    Fingerprint::from_hex(tractflow::fingerprint::hash::hash_str(seed))
}

fn outputs(path: &str) -> BTreeMap<String, PathBuf> {
    BTreeMap::from([("out".to_string(), PathBuf::from(path))])
}

fn exercise_contract(ledger: &dyn RunLedger) -> TestResult {
    let key = fp("flirt-v1");
    assert!(ledger.lookup("flirt", &key)?.is_none());

    // A failure is recorded but is not a cache hit.
    let failure = ExecutionError::NonZeroExit { code: 3 };
    ledger.record(LedgerEntry::failed("flirt", key.clone(), &failure))?;
    let entry = ledger.lookup("flirt", &key)?.expect("failed entry");
    assert_eq!(entry.status, LedgerStatus::Failed);
    assert!(!entry.is_success());
    assert!(entry.failure.as_deref().unwrap_or("").contains('3'));

    // A later success supersedes the failure.
    ledger.record(LedgerEntry::succeeded("flirt", key.clone(), outputs("/w/a")))?;
    let entry = ledger.lookup("flirt", &key)?.expect("success entry");
    assert!(entry.is_success());
    assert_eq!(entry.outputs, outputs("/w/a"));

    // Successes are immutable.
    ledger.record(LedgerEntry::failed("flirt", key.clone(), &failure))?;
    ledger.record(LedgerEntry::succeeded("flirt", key.clone(), outputs("/w/b")))?;
    let entry = ledger.lookup("flirt", &key)?.expect("success entry");
    assert!(entry.is_success());
    assert_eq!(entry.outputs, outputs("/w/a"));

    // Keys are per (step, fingerprint).
    assert!(ledger.lookup("flirt", &fp("flirt-v2"))?.is_none());
    assert!(ledger.lookup("bet", &key)?.is_none());

    ledger.record(LedgerEntry::succeeded("flirt", fp("flirt-v2"), outputs("/w/c")))?;
    assert_eq!(ledger.entries_for("flirt")?.len(), 2);
    assert!(ledger.entries_for("bet")?.is_empty());
    Ok(())
}

#[test]
fn memory_ledger_honours_the_contract() -> TestResult {
    init_tracing();
    let ledger = MemoryLedger::new();
    exercise_contract(&ledger)?;
    assert_eq!(ledger.len(), 2);
    Ok(())
}

#[test]
fn file_ledger_honours_the_contract() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let ledger = FileLedger::open(dir.path().join("ledger"))?;
    exercise_contract(&ledger)
}

#[test]
fn file_ledger_survives_reopening() -> TestResult {
    let dir = tempdir()?;
    let key = fp("tckgen");

    {
        let ledger = open_ledger(LedgerStorageMode::File, dir.path())?;
        ledger.record(LedgerEntry::succeeded("sub-01.tckgen", key.clone(), outputs("/w/prob.tck")))?;
    }

    let reopened = open_ledger(LedgerStorageMode::File, dir.path())?;
    let entry = reopened
        .lookup("sub-01.tckgen", &key)?
        .expect("entry survives restart");
    assert!(entry.is_success());
    assert_eq!(entry.outputs, outputs("/w/prob.tck"));

    assert!(dir.path().join(LEDGER_DIR).is_dir());
    Ok(())
}

#[test]
fn file_ledger_reports_corrupt_records() -> TestResult {
    let dir = tempdir()?;
    let ledger = FileLedger::open(dir.path())?;
    let key = fp("bet");
    ledger.record(LedgerEntry::succeeded("bet", key.clone(), outputs("/w/brain")))?;

    let record = fs::read_dir(dir.path().join("bet"))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|x| x == "json"))
        .expect("record file");
    fs::write(&record, b"{ not json")?;

    assert!(matches!(
        ledger.lookup("bet", &key),
        Err(LedgerError::Corrupt { .. })
    ));
    Ok(())
}

#[test]
fn step_ids_cannot_escape_the_ledger_root() -> TestResult {
    let dir = tempdir()?;
    let root = dir.path().join("ledger");
    let ledger = FileLedger::open(&root)?;

    ledger.record(LedgerEntry::succeeded("../../evil", fp("x"), BTreeMap::new()))?;

    assert!(ledger.lookup("../../evil", &fp("x"))?.is_some());
    let escaped: Vec<_> = fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .collect();
    assert_eq!(escaped, vec![std::ffi::OsString::from("ledger")]);
    Ok(())
}

#[test]
fn concurrent_writers_leave_one_complete_record_per_key() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let ledger: Arc<dyn RunLedger> = Arc::new(FileLedger::open(dir.path())?);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                let step = format!("step-{}", i % 4);
                let out = outputs(&format!("/w/{i}"));
                ledger.record(LedgerEntry::succeeded(step.clone(), fp(&step), out))
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    for s in 0..4 {
        let step = format!("step-{s}");
        let entries = ledger.entries_for(&step)?;
        assert_eq!(entries.len(), 1, "{step}");
        assert!(entries[0].is_success());
    }

    let leftovers: Vec<_> = fs::read_dir(dir.path().join("step-0"))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}
