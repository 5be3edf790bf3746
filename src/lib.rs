//! tidyguard - sort and deduplicate files without risking them
//!
//! This library scans a directory tree, plans moves by file type or
//! modification date, finds byte-identical duplicates, and applies the plan
//! only after every touched file has been backed up. Each run is recorded in
//! a per-directory ledger, and a failed run can be restored from its snapshot.

pub mod backup;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod ledger;
pub mod mutator;
pub mod orchestrator;
pub mod output;
pub mod scanner;

pub use backup::{BackupManager, RestoreReport, Snapshot};
pub use config::{CompiledFilters, Config};
pub use error::{Result, TidyError};
pub use events::{ProgressEvent, RunState};
pub use ledger::{Ledger, OperationKind, OperationRecord, Outcome};
pub use mutator::{Disposition, PlannedAction};
pub use orchestrator::{
    FailedRun, Operation, OperationRequest, Orchestrator, PreparedRun, RunHandle, RunOutcome,
    RunReport,
};
pub use scanner::{FileRecord, walk};
