use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Where the run ledger keeps its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStorageMode {
    /// One JSON record per `(step, fingerprint)` under `<work_dir>/ledger`.
    File,
    /// In memory only (lost on restart, every run starts cold).
    Memory,
}

impl Default for LedgerStorageMode {
    fn default() -> Self {
        LedgerStorageMode::File
    }
}

impl FromStr for LedgerStorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(LedgerStorageMode::File),
            "memory" => Ok(LedgerStorageMode::Memory),
            other => Err(format!(
                "invalid ledger mode: {other} (expected \"file\" or \"memory\")"
            )),
        }
    }
}

/// How resolved inputs are placed into a step's scratch directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingPolicy {
    /// Symlink to the original file (unix only; falls back to copy elsewhere).
    Symlink,
    /// Full copy of the file or directory.
    Copy,
}

impl Default for StagingPolicy {
    fn default() -> Self {
        StagingPolicy::Symlink
    }
}

impl FromStr for StagingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "symlink" => Ok(StagingPolicy::Symlink),
            "copy" => Ok(StagingPolicy::Copy),
            other => Err(format!(
                "invalid staging policy: {other} (expected \"symlink\" or \"copy\")"
            )),
        }
    }
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"5m"` or `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    if value == 0 {
        return Err(format!("duration '{}' must be greater than zero", s));
    }

    let too_large = || format!("duration '{}' is too large", s);
    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(too_large),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
