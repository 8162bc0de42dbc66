//! xxHash-based content fingerprints for deduplication
//!
//! Every byte of the file is hashed; large files are streamed rather than
//! sampled so two files only share a fingerprint when their contents match.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::trace;
use xxhash_rust::xxh3::Xxh3;

/// Read buffer size for streaming hashes (256KB)
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// 128-bit xxHash3 of a file's full contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(u128);

impl Fingerprint {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(data);
        Fingerprint(hasher.digest128())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_string()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        u128::from_str_radix(&value, 16).map(Fingerprint)
    }
}

/// Compute the fingerprint of a file's full contents
pub fn compute_fingerprint(path: &Path) -> Result<Fingerprint> {
    let file = File::open(path).map_err(|e| Error::HashComputation {
        path: path.to_path_buf(),
        message: format!("Failed to open file: {}", e),
    })?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| Error::HashComputation {
            path: path.to_path_buf(),
            message: format!("Failed to read file: {}", e),
        })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    let fingerprint = Fingerprint(hasher.digest128());
    trace!(?path, bytes = total, %fingerprint, "Computed content fingerprint");
    Ok(fingerprint)
}

/// Outcome of offering a file to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First file seen with this content
    Canonical,
    /// Content already seen; holds the path of the first file
    Duplicate { canonical: PathBuf },
}

/// Session-scoped map from fingerprint to the first path observed with it
#[derive(Debug, Default)]
pub struct DeduplicationIndex {
    first_seen: HashMap<Fingerprint, PathBuf>,
}

impl DeduplicationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path` under `fingerprint`; the first path offered wins
    pub fn observe(&mut self, fingerprint: Fingerprint, path: &Path) -> DedupOutcome {
        match self.first_seen.entry(fingerprint) {
            Entry::Occupied(existing) => DedupOutcome::Duplicate {
                canonical: existing.get().clone(),
            },
            Entry::Vacant(slot) => {
                slot.insert(path.to_path_buf());
                DedupOutcome::Canonical
            }
        }
    }
}
