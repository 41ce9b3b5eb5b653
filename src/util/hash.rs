//! SHA-256 helpers for source archives and installed files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice as lowercase hex.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA256 hash of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Normalize a checksum as written in a descriptor.
///
/// Accepts an optional `sha256:` prefix and any hex case. Returns `None` when
/// the value is not 64 hex digits.
pub fn normalize_sha256(value: &str) -> Option<String> {
    let value = value.trim();
    let value = value.strip_prefix("sha256:").unwrap_or(value);

    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(value.to_ascii_lowercase())
}

/// Compare two files by content.
pub fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = std::fs::metadata(a).with_context(|| format!("failed to stat {}", a.display()))?;
    let meta_b = std::fs::metadata(b).with_context(|| format!("failed to stat {}", b.display()))?;

    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    Ok(sha256_file(a)? == sha256_file(b)?)
}
