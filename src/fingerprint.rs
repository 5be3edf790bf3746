//! Content fingerprints.
//!
//! Files are bucketed by size first; only sizes shared by two or more files
//! are hashed, since a file with a unique size cannot have a duplicate.
//! Hashing is SHA-256 over the streamed file content, so memory use does not
//! depend on file size and the result depends only on the bytes.

use crate::error::{Result, ScanError, TidyError};
use crate::scanner::FileRecord;
use log::{debug, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Buffer size for streaming hash computation (64KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parses a 64 character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut hash = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk).ok()?;
            hash[i] = u8::from_str_radix(hex_str, 16).ok()?;
        }
        Some(Self(hash))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid fingerprint"))
    }
}

/// Compute SHA256 hash of a file using streaming (memory-efficient)
pub fn compute_file_hash(path: &Path) -> std::io::Result<Fingerprint> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Fingerprint(hasher.finalize().into()))
}

/// Hashes a single record, returning a copy with the hash attached.
pub fn fingerprint(record: &FileRecord) -> std::result::Result<FileRecord, ScanError> {
    compute_file_hash(record.path())
        .map(|hash| record.with_hash(hash))
        .map_err(|source| ScanError::HashFailed {
            path: record.path().to_path_buf(),
            source,
        })
}

/// Result of fingerprinting a scan.
#[derive(Debug, Default)]
pub struct FingerprintOutcome {
    /// Hashed records, in discovery order.
    pub records: Vec<FileRecord>,
    /// Files whose content could not be read.
    pub skipped: Vec<ScanError>,
    /// Files never hashed because no other file shares their size.
    pub unique_size: usize,
}

/// Keeps only records whose size is shared with at least one other record.
///
/// Discovery order is preserved.
pub fn size_candidates(records: Vec<FileRecord>) -> (Vec<FileRecord>, usize) {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for record in &records {
        *counts.entry(record.size()).or_insert(0) += 1;
    }
    let total = records.len();
    let candidates: Vec<FileRecord> = records
        .into_iter()
        .filter(|record| counts.get(&record.size()).copied().unwrap_or(0) >= 2)
        .collect();
    let unique = total - candidates.len();
    (candidates, unique)
}

/// Hashes every size-sharing record on a bounded worker pool.
///
/// `workers == 0` uses one worker per CPU. Results are joined before this
/// returns, so callers never see a partial set. `on_hashed` runs on worker
/// threads once per record, hashed or skipped.
pub fn fingerprint_candidates<F>(
    records: Vec<FileRecord>,
    workers: usize,
    cancel: &AtomicBool,
    on_hashed: F,
) -> Result<FingerprintOutcome>
where
    F: Fn(&Path) + Send + Sync,
{
    let (candidates, unique_size) = size_candidates(records);
    debug!(
        "Hashing {} size-matched files ({} unique sizes skipped)",
        candidates.len(),
        unique_size
    );

    let hash_all = || -> Vec<Option<std::result::Result<FileRecord, ScanError>>> {
        candidates
            .par_iter()
            .map(|record| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let result = fingerprint(record);
                if let Err(e) = &result {
                    trace!("{}", e);
                }
                on_hashed(record.path());
                Some(result)
            })
            .collect()
    };

    let results = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(hash_all),
        Err(e) => {
            warn!("Failed to build hash worker pool, using global pool: {}", e);
            hash_all()
        }
    };

    if cancel.load(Ordering::SeqCst) {
        return Err(TidyError::Cancelled);
    }

    let mut outcome = FingerprintOutcome {
        unique_size,
        ..Default::default()
    };
    for result in results.into_iter().flatten() {
        match result {
            Ok(record) => outcome.records.push(record),
            Err(e) => {
                warn!("Skipping {}", e);
                outcome.skipped.push(e);
            }
        }
    }
    Ok(outcome)
}
