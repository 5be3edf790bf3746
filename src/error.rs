//! Error types for tidyguard.
//!
//! Each failure class gets its own enum so callers can tell a rejected request
//! (nothing touched) from a half-finished one (restore available). Every variant
//! names the path involved and keeps the underlying cause as its source.

use std::path::PathBuf;
use thiserror::Error;

/// A request was rejected before any I/O took place.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The target path does not exist or cannot be inspected.
    #[error("Target directory {path} is not accessible: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target path exists but is not a directory.
    #[error("Target {0} is not a directory")]
    NotADirectory(PathBuf),

    /// The operation name is not one of the supported kinds.
    #[error("Unknown operation '{0}': expected sort-by-type, sort-by-date or dedupe")]
    UnknownOperation(String),

    /// The dedupe disposition could not be parsed.
    #[error("Unknown disposition '{0}': expected report-only, delete or move-to:<directory>")]
    UnknownDisposition(String),

    /// The date bucketing pattern is empty or not a valid strftime pattern.
    #[error("Invalid date pattern '{pattern}': {reason}")]
    InvalidDatePattern { pattern: String, reason: String },
}

/// A single entry could not be read during a scan. The entry is skipped.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot hash {path}: {source}")]
    HashFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// The path that was skipped.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Unreadable { path, .. } | Self::HashFailed { path, .. } => path,
        }
    }
}

/// The pre-mutation snapshot could not be completed, or a restore failed.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to create backup directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to back up {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is outside the snapshot source root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Failed to write snapshot manifest {path}: {reason}")]
    ManifestWrite { path: PathBuf, reason: String },

    #[error("Failed to read snapshot manifest {path}: {reason}")]
    ManifestRead { path: PathBuf, reason: String },

    #[error("Failed to remove snapshot {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot '{0}' not found")]
    NotFound(String),
}

/// An individual move or delete failed. Mutation halts for the run.
#[derive(Error, Debug)]
pub enum MutationError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite existing {0}")]
    DestinationOccupied(PathBuf),

    #[error("Copy of {from} to {to} did not verify; original left untouched")]
    VerificationFailed { from: PathBuf, to: PathBuf },

    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The operation history could not be read or persisted.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration could not be loaded or compiled.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },

    #[error("IO error reading configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error for orchestrated runs.
#[derive(Error, Debug)]
pub enum TidyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TidyError>;
