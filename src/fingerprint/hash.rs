// src/fingerprint/hash.rs

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;

/// Compute the content hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading file for hashing: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Content digest of a file, or of a directory tree.
///
/// Directories are hashed over their sorted entry names and the digests of
/// their children, so the result is independent of `read_dir` order and of
/// where the directory lives.
pub fn compute_path_digest(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    if !fs.is_dir(path) {
        return compute_file_hash(fs, path);
    }

    let mut children: Vec<PathBuf> = fs.read_dir(path)?;
    children.sort();

    let mut hasher = Hasher::new();
    hasher.update(b"dir\0");
    for child in children {
        let name = child
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let digest = compute_path_digest(fs, &child)?;
        update_field(&mut hasher, name.as_bytes());
        update_field(&mut hasher, digest.as_bytes());
    }

    let hash = hasher.finalize().to_hex().to_string();
    debug!(path = ?path, hash = %hash, "computed directory digest");
    Ok(hash)
}

/// Hash a string and return hex.
pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Length-prefixed update, so adjacent fields can never run into each other
/// (`"ab" + "c"` hashes differently from `"a" + "bc"`).
pub(crate) fn update_field(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
