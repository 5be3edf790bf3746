//! Directory-scoped operation history.
//!
//! Each operated-on directory carries its own ledger file. Records are only
//! ever appended; a ledger that cannot be parsed is reported, never replaced.

use crate::error::{LedgerError, ValidationError};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Ledger file name, relative to the operated-on directory.
pub const LEDGER_FILE: &str = ".tidyguard_history.json";

const LEDGER_VERSION: u32 = 1;

/// Default window, in seconds, for the recent-run warning.
pub const DEFAULT_RECENT_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    SortByType,
    SortByDate,
    Dedupe,
    Restore,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::SortByType => "sort-by-type",
            OperationKind::SortByDate => "sort-by-date",
            OperationKind::Dedupe => "dedupe",
            OperationKind::Restore => "restore",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sort-by-type" => Ok(OperationKind::SortByType),
            "sort-by-date" => Ok(OperationKind::SortByDate),
            "dedupe" => Ok(OperationKind::Dedupe),
            "restore" => Ok(OperationKind::Restore),
            other => Err(ValidationError::UnknownOperation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failed => f.write_str("failed"),
        }
    }
}

/// One completed (or failed) run against a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: OperationKind,
    pub directory: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    /// Id of the snapshot taken before the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl OperationRecord {
    pub fn new(operation: OperationKind, directory: &Path, outcome: Outcome) -> Self {
        Self {
            operation,
            directory: directory.to_path_buf(),
            timestamp: Utc::now(),
            outcome,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, id: Option<String>) -> Self {
        self.snapshot = id;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    operations: Vec<OperationRecord>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            operations: Vec::new(),
        }
    }
}

/// The ledger of one directory.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Opens the ledger for `directory`. The file is created on first record.
    pub fn open(directory: &Path) -> Self {
        Self {
            path: directory.join(LEDGER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first. A missing ledger is empty.
    pub fn records(&self) -> Result<Vec<OperationRecord>, LedgerError> {
        Ok(self.read()?.operations)
    }

    fn read(&self) -> Result<LedgerFile, LedgerError> {
        if !self.path.exists() {
            return Ok(LedgerFile::default());
        }
        let json = fs::read_to_string(&self.path).map_err(|e| LedgerError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| LedgerError::Malformed {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Appends `record`.
    ///
    /// The whole ledger is rewritten through a temporary file and renamed into
    /// place, so a crash mid-write leaves the previous ledger intact.
    pub fn record(&self, record: OperationRecord) -> Result<(), LedgerError> {
        let mut ledger = self.read()?;
        ledger.operations.push(record);

        let json = serde_json::to_string_pretty(&ledger).map_err(|e| LedgerError::Malformed {
            path: self.path.clone(),
            source: e,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| LedgerError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            LedgerError::Write {
                path: self.path.clone(),
                source: e,
            }
        })?;

        debug!(
            "Recorded {} operation(s) in {}",
            ledger.operations.len(),
            self.path.display()
        );
        Ok(())
    }

    /// True if a `kind` run was recorded within `window` of now.
    ///
    /// Advisory only: callers warn on `true`, they never refuse to run.
    pub fn is_recent_duplicate(
        &self,
        kind: OperationKind,
        window: Duration,
    ) -> Result<bool, LedgerError> {
        let now = Utc::now();
        Ok(self
            .records()?
            .iter()
            .any(|r| r.operation == kind && now.signed_duration_since(r.timestamp) <= window))
    }

    /// Most recent run whose snapshot has not been restored yet.
    pub fn latest_snapshot(&self) -> Result<Option<OperationRecord>, LedgerError> {
        let mut restored = HashSet::new();
        for record in self.records()?.into_iter().rev() {
            let Some(id) = &record.snapshot else {
                continue;
            };
            if record.operation == OperationKind::Restore {
                if record.outcome == Outcome::Success {
                    restored.insert(id.clone());
                }
            } else if !restored.contains(id) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}
