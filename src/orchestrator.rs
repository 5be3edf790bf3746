//! Sequences a run: validate, check history, plan, back up, mutate, record.
//!
//! A run is split in two phases. [`Orchestrator::prepare`] validates the
//! request, consults the ledger and computes the plan without touching the
//! tree. [`PreparedRun::execute`] snapshots every file the plan touches and
//! only then applies it. A run that fails after the snapshot comes back as a
//! [`FailedRun`], which the caller either restores or declines.
//!
//! ```no_run
//! use tidyguard::config::Config;
//! use tidyguard::orchestrator::{Operation, OperationRequest, Orchestrator, RunOutcome};
//!
//! let orchestrator = Orchestrator::new(&Config::default())?;
//! let request = OperationRequest::new("/home/me/Downloads", Operation::SortByType);
//! match orchestrator.run(request)? {
//!     RunOutcome::Completed(report) => println!("{} files moved", report.applied.len()),
//!     RunOutcome::Failed(failed) => {
//!         eprintln!("{}", failed.error());
//!         failed.restore()?;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::backup::{BackupManager, RestoreReport, Snapshot};
use crate::classifier::{
    DEFAULT_DATE_PATTERN, plan_sort_by_date, plan_sort_by_type, validate_date_pattern,
};
use crate::config::{CompiledFilters, Config};
use crate::duplicates::{self, GroupReport};
use crate::error::{ConfigError, Result, TidyError, ValidationError};
use crate::events::{EventSink, ProgressEvent, RunState, StateMachine};
use crate::fingerprint::fingerprint_candidates;
use crate::ledger::{Ledger, OperationKind, OperationRecord, Outcome};
use crate::mutator::{self, Disposition, Halt, PlannedAction};
use crate::scanner::{FileRecord, ScanEntry, Scanner};
use chrono::Duration;
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

/// Largest window `chrono::Duration::seconds` accepts.
const MAX_WINDOW_SECS: u64 = (i64::MAX / 1000) as u64;

/// What a run does to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    SortByType,
    SortByDate { pattern: String },
    Dedupe { disposition: Disposition },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::SortByType => OperationKind::SortByType,
            Operation::SortByDate { .. } => OperationKind::SortByDate,
            Operation::Dedupe { .. } => OperationKind::Dedupe,
        }
    }

    /// Builds an operation from its name and optional arguments.
    ///
    /// `pattern` defaults to `%Y-%m` and `disposition` to `report-only`.
    pub fn parse(
        name: &str,
        pattern: Option<&str>,
        disposition: Option<&str>,
    ) -> std::result::Result<Self, ValidationError> {
        match name.parse::<OperationKind>()? {
            OperationKind::SortByType => Ok(Operation::SortByType),
            OperationKind::SortByDate => Ok(Operation::SortByDate {
                pattern: pattern.unwrap_or(DEFAULT_DATE_PATTERN).to_string(),
            }),
            OperationKind::Dedupe => Ok(Operation::Dedupe {
                disposition: disposition
                    .map(str::parse::<Disposition>)
                    .transpose()?
                    .unwrap_or_default(),
            }),
            OperationKind::Restore => Err(ValidationError::UnknownOperation(name.to_string())),
        }
    }
}

/// Input to a run, as supplied by the presentation layer.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub root: PathBuf,
    pub recursive: bool,
    pub operation: Operation,
    pub dry_run: bool,
}

impl OperationRequest {
    pub fn new(root: impl Into<PathBuf>, operation: Operation) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            operation,
            dry_run: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// An entry the scan or the hashing step could not read.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Structured result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation: OperationKind,
    pub root: PathBuf,
    pub dry_run: bool,
    /// `None` until the run executes; dry runs never set it.
    pub outcome: Option<Outcome>,
    /// Duplicate groups, keeper first (dedupe only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupReport>,
    pub planned: Vec<PlannedAction>,
    pub applied: Vec<PlannedAction>,
    pub not_applied: Vec<PlannedAction>,
    pub skipped: Vec<SkippedEntry>,
    pub symlinks: Vec<PathBuf>,
    pub warnings: Vec<String>,
    pub snapshot: Option<String>,
    pub error: Option<String>,
}

impl RunReport {
    fn new(operation: OperationKind, root: &Path, dry_run: bool) -> Self {
        Self {
            operation,
            root: root.to_path_buf(),
            dry_run,
            outcome: None,
            groups: Vec::new(),
            planned: Vec::new(),
            applied: Vec::new(),
            not_applied: Vec::new(),
            skipped: Vec::new(),
            symlinks: Vec::new(),
            warnings: Vec::new(),
            snapshot: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
struct RunContext {
    backups: BackupManager,
    events: EventSink,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    fn warn(&self, report: &mut RunReport, message: String) {
        warn!("{}", message);
        self.events.emit(ProgressEvent::Warning(message.clone()));
        report.warnings.push(message);
    }

    fn record(&self, ledger: &Ledger, record: OperationRecord, report: &mut RunReport) {
        if let Err(e) = ledger.record(record) {
            self.warn(report, format!("History not recorded: {}", e));
        }
    }
}

/// Drives runs against directory trees.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    filters: CompiledFilters,
    workers: usize,
    recent_window: Duration,
    ctx: RunContext,
}

impl Orchestrator {
    pub fn new(config: &Config) -> std::result::Result<Self, ConfigError> {
        let recent_window_secs = config.ledger.recent_window_secs.min(MAX_WINDOW_SECS) as i64;
        Ok(Self {
            filters: config.compile_filters()?,
            workers: config.scan.workers,
            recent_window: Duration::seconds(recent_window_secs),
            ctx: RunContext {
                backups: BackupManager::new(config.backup_root()),
                events: EventSink::default(),
                cancel: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub fn with_backup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.ctx.backups = BackupManager::new(root);
        self
    }

    /// Sends progress events to `sender`.
    pub fn with_events(mut self, sender: mpsc::Sender<ProgressEvent>) -> Self {
        self.ctx.events = EventSink::new(sender);
        self
    }

    /// Shares an externally owned cancellation flag, e.g. one set from Ctrl-C.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.ctx.cancel = cancel;
        self
    }

    /// Flag that, once set, stops the run at the next file boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ctx.cancel)
    }

    pub fn backups(&self) -> &BackupManager {
        &self.ctx.backups
    }

    /// Validates `request`, checks the ledger and computes the plan.
    ///
    /// Nothing on disk changes. A validation error returns before any I/O
    /// beyond inspecting the target. A dry run ends here in state `Done`.
    pub fn prepare(&self, request: OperationRequest) -> Result<PreparedRun> {
        let mut machine = StateMachine::new(self.ctx.events.clone());
        let kind = request.operation.kind();

        machine.transition(RunState::Validating);
        let (root, operation) = match validate(&request) {
            Ok(validated) => validated,
            Err(e) => {
                machine.transition(RunState::Idle);
                return Err(e.into());
            }
        };

        machine.transition(RunState::CheckingHistory);
        let ledger = Ledger::open(&root);
        let mut report = RunReport::new(kind, &root, request.dry_run);
        match ledger.is_recent_duplicate(kind, self.recent_window) {
            Ok(true) => self.ctx.warn(
                &mut report,
                format!(
                    "{} already ran on {} within the last {} seconds",
                    kind,
                    root.display(),
                    self.recent_window.num_seconds()
                ),
            ),
            Ok(false) => {}
            Err(e) => self.ctx.warn(&mut report, format!("History unavailable: {}", e)),
        }

        let actions = match self.plan(&root, request.recursive, &operation, &mut report) {
            Ok(actions) => actions,
            Err(e) => {
                machine.transition(RunState::Idle);
                return Err(e);
            }
        };
        self.ctx
            .events
            .emit(ProgressEvent::PlanReady { actions: actions.len() });
        report.planned = actions.clone();
        info!(
            "Planned {} actions for {} on {}",
            actions.len(),
            kind,
            root.display()
        );

        if request.dry_run {
            machine.transition(RunState::Done);
        }

        Ok(PreparedRun {
            ctx: self.ctx.clone(),
            machine,
            ledger,
            actions,
            report,
        })
    }

    /// Prepares and executes `request`.
    pub fn run(&self, request: OperationRequest) -> Result<RunOutcome> {
        Ok(self.prepare(request)?.execute())
    }

    /// Runs `request` on a worker thread.
    ///
    /// Events arrive on [`RunHandle::events`] in order. The last event of a
    /// run that got past validation is [`ProgressEvent::Finished`].
    pub fn spawn(mut self, request: OperationRequest) -> RunHandle {
        let (sender, events) = mpsc::channel();
        self.ctx.events = EventSink::new(sender);
        let cancel = self.cancel_flag();
        let handle = thread::spawn(move || self.run(request));
        RunHandle {
            events,
            cancel,
            handle,
        }
    }

    /// The newest snapshot of `root` that has not been restored yet.
    pub fn latest_snapshot(&self, root: &Path) -> Result<Option<Snapshot>> {
        let root = validate_root(root)?;
        match Ledger::open(&root).latest_snapshot()? {
            Some(OperationRecord {
                snapshot: Some(id),
                ..
            }) => Ok(Some(self.ctx.backups.load(&id)?)),
            _ => Ok(None),
        }
    }

    /// Restores `snapshot` over its source tree and records the restore.
    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<RestoreReport> {
        let mut machine = StateMachine::new(self.ctx.events.clone());
        machine.transition(RunState::Restoring);
        let result = restore_and_record(&self.ctx, snapshot);
        machine.transition(RunState::Idle);
        result
    }

    fn plan(
        &self,
        root: &Path,
        recursive: bool,
        operation: &Operation,
        report: &mut RunReport,
    ) -> Result<Vec<PlannedAction>> {
        let mut scanner = Scanner::new(root, recursive)
            .with_filters(&self.filters)
            .exclude_dir(self.ctx.backups.root());
        if let Operation::Dedupe {
            disposition: Disposition::MoveTo(quarantine),
        } = operation
        {
            scanner = scanner.exclude_dir(quarantine);
        }

        let records = self.scan(&scanner, report)?;

        match operation {
            Operation::SortByType => Ok(plan_sort_by_type(root, &records).actions()),
            Operation::SortByDate { pattern } => {
                Ok(plan_sort_by_date(root, &records, pattern)?.actions())
            }
            Operation::Dedupe { disposition } => {
                let events = &self.ctx.events;
                let outcome =
                    fingerprint_candidates(records, self.workers, &self.ctx.cancel, |path| {
                        events.emit(ProgressEvent::FileHashed(path.to_path_buf()))
                    })?;
                for e in outcome.skipped {
                    report.skipped.push(SkippedEntry {
                        path: e.path().clone(),
                        reason: e.to_string(),
                    });
                }

                let groups = duplicates::group(&outcome.records);
                for group in &groups {
                    events.emit(ProgressEvent::GroupFormed {
                        fingerprint: group.fingerprint().to_hex(),
                        members: group.members().len(),
                    });
                }
                report.groups = groups.iter().map(|g| g.report()).collect();
                Ok(duplicates::plan_removals(&groups, disposition))
            }
        }
    }

    fn scan(&self, scanner: &Scanner<'_>, report: &mut RunReport) -> Result<Vec<FileRecord>> {
        let events = &self.ctx.events;
        let mut records = Vec::new();
        for entry in scanner.iter() {
            if self.ctx.cancel.load(Ordering::SeqCst) {
                return Err(TidyError::Cancelled);
            }
            match entry {
                ScanEntry::File(record) => {
                    events.emit(ProgressEvent::FileScanned(record.path().to_path_buf()));
                    records.push(record);
                }
                ScanEntry::Symlink(path) => report.symlinks.push(path),
                ScanEntry::Skipped(e) => {
                    let skipped = SkippedEntry {
                        path: e.path().clone(),
                        reason: e.to_string(),
                    };
                    events.emit(ProgressEvent::EntrySkipped {
                        path: skipped.path.clone(),
                        reason: skipped.reason.clone(),
                    });
                    report.skipped.push(skipped);
                }
            }
        }
        Ok(records)
    }
}

fn validate_root(root: &Path) -> std::result::Result<PathBuf, ValidationError> {
    let inaccessible = |source| ValidationError::Inaccessible {
        path: root.to_path_buf(),
        source,
    };
    let metadata = fs::metadata(root).map_err(inaccessible)?;
    if !metadata.is_dir() {
        return Err(ValidationError::NotADirectory(root.to_path_buf()));
    }
    fs::read_dir(root).map_err(inaccessible)?;
    fs::canonicalize(root).map_err(inaccessible)
}

/// Canonical root plus the operation with relative paths resolved against it.
fn validate(
    request: &OperationRequest,
) -> std::result::Result<(PathBuf, Operation), ValidationError> {
    let root = validate_root(&request.root)?;
    let operation = match &request.operation {
        Operation::SortByDate { pattern } => {
            validate_date_pattern(pattern)?;
            request.operation.clone()
        }
        Operation::Dedupe {
            disposition: Disposition::MoveTo(dir),
        } if dir.is_relative() => Operation::Dedupe {
            disposition: Disposition::MoveTo(root.join(dir)),
        },
        other => other.clone(),
    };
    Ok((root, operation))
}

fn restore_and_record(ctx: &RunContext, snapshot: &Snapshot) -> Result<RestoreReport> {
    let result = ctx.backups.restore(snapshot);
    let outcome = match &result {
        Ok(report) if report.is_complete_success() => Outcome::Success,
        _ => Outcome::Failed,
    };
    let ledger = Ledger::open(&snapshot.source_root);
    let record = OperationRecord::new(OperationKind::Restore, &snapshot.source_root, outcome)
        .with_snapshot(Some(snapshot.id.clone()));
    if let Err(e) = ledger.record(record) {
        warn!("History not recorded: {}", e);
        ctx.events
            .emit(ProgressEvent::Warning(format!("History not recorded: {}", e)));
    }
    result.map_err(TidyError::from)
}

/// A planned run that has not touched the tree yet.
#[derive(Debug)]
pub struct PreparedRun {
    ctx: RunContext,
    machine: StateMachine,
    ledger: Ledger,
    actions: Vec<PlannedAction>,
    report: RunReport,
}

impl PreparedRun {
    pub fn state(&self) -> RunState {
        self.machine.state()
    }

    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn is_dry_run(&self) -> bool {
        self.report.dry_run
    }

    /// Backs up, applies the plan and records the outcome.
    ///
    /// A dry run returns its report unchanged. No action is applied unless
    /// the snapshot of every file it touches succeeded first.
    pub fn execute(mut self) -> RunOutcome {
        if self.report.dry_run {
            self.ctx.events.emit(ProgressEvent::Finished {
                outcome: Outcome::Success,
            });
            return RunOutcome::Completed(self.report);
        }

        self.machine.transition(RunState::BackingUp);
        let mut snapshot = if self.actions.is_empty() {
            None
        } else {
            let affected: Vec<PathBuf> = self
                .actions
                .iter()
                .map(|a| a.source().to_path_buf())
                .collect();
            let planned: Vec<PathBuf> = self
                .actions
                .iter()
                .filter_map(|a| a.created().map(Path::to_path_buf))
                .collect();
            match self
                .ctx
                .backups
                .snapshot(&self.report.root, &affected, &planned)
            {
                Ok(snapshot) => {
                    self.ctx.events.emit(ProgressEvent::BackupCreated {
                        id: snapshot.id.clone(),
                        files: snapshot.len(),
                    });
                    self.report.snapshot = Some(snapshot.id.clone());
                    Some(snapshot)
                }
                Err(e) => {
                    self.report.not_applied = self.actions.clone();
                    return self.fail(e.into(), None);
                }
            }
        };

        self.machine.transition(RunState::Executing);
        let total = self.actions.len();
        let events = self.ctx.events.clone();
        let execution = mutator::apply(&self.actions, &self.ctx.cancel, |index, action| {
            events.emit(ProgressEvent::ActionApplied {
                index,
                total,
                action: action.clone(),
            })
        });
        self.report.applied = execution.completed;
        self.report.not_applied = execution.not_applied;
        if let Some(snapshot) = snapshot.as_mut() {
            let created = self
                .report
                .applied
                .iter()
                .filter_map(|a| a.created().map(Path::to_path_buf))
                .collect();
            if let Err(e) = self.ctx.backups.record_created(snapshot, created) {
                self.ctx.warn(
                    &mut self.report,
                    format!("Snapshot {} may leave moved copies on restore: {}", snapshot.id, e),
                );
            }
        }
        match execution.halted {
            Some(Halt::Failed(e)) => return self.fail(e.into(), snapshot),
            Some(Halt::Cancelled) => return self.fail(TidyError::Cancelled, snapshot),
            None => {}
        }

        self.machine.transition(RunState::Recording);
        self.report.outcome = Some(Outcome::Success);
        let record = OperationRecord::new(self.report.operation, &self.report.root, Outcome::Success)
            .with_snapshot(self.report.snapshot.clone());
        self.ctx.record(&self.ledger, record, &mut self.report);
        self.machine.transition(RunState::Done);

        info!(
            "{} on {} applied {} actions",
            self.report.operation,
            self.report.root.display(),
            self.report.applied.len()
        );
        self.ctx.events.emit(ProgressEvent::Finished {
            outcome: Outcome::Success,
        });
        RunOutcome::Completed(self.report)
    }

    fn fail(mut self, error: TidyError, snapshot: Option<Snapshot>) -> RunOutcome {
        self.machine.transition(RunState::Failed);
        warn!(
            "{} on {} failed after {} of {} actions: {}",
            self.report.operation,
            self.report.root.display(),
            self.report.applied.len(),
            self.actions.len(),
            error
        );
        self.report.outcome = Some(Outcome::Failed);
        self.report.error = Some(error.to_string());

        let record = OperationRecord::new(self.report.operation, &self.report.root, Outcome::Failed)
            .with_snapshot(self.report.snapshot.clone());
        self.ctx.record(&self.ledger, record, &mut self.report);
        self.ctx.events.emit(ProgressEvent::Finished {
            outcome: Outcome::Failed,
        });

        RunOutcome::Failed(FailedRun {
            ctx: self.ctx,
            machine: self.machine,
            report: self.report,
            snapshot,
            error,
        })
    }
}

/// How an executed run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    Failed(FailedRun),
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Completed(report) => report,
            RunOutcome::Failed(failed) => failed.report(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// A run that stopped part-way. Restore or decline it.
#[derive(Debug)]
pub struct FailedRun {
    ctx: RunContext,
    machine: StateMachine,
    report: RunReport,
    snapshot: Option<Snapshot>,
    error: TidyError,
}

impl FailedRun {
    pub fn error(&self) -> &TidyError {
        &self.error
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn state(&self) -> RunState {
        self.machine.state()
    }

    /// Returns the tree to its pre-run state from the snapshot.
    ///
    /// Without a snapshot the backup itself failed and nothing was changed,
    /// so there is nothing to restore.
    pub fn restore(mut self) -> Result<RestoreReport> {
        self.machine.transition(RunState::Restoring);
        let result = match &self.snapshot {
            Some(snapshot) => restore_and_record(&self.ctx, snapshot),
            None => Ok(RestoreReport::default()),
        };
        self.machine.transition(RunState::Idle);
        result
    }

    /// Leaves the tree as it is and returns the report of what was applied.
    pub fn decline(mut self) -> RunReport {
        self.machine.transition(RunState::Idle);
        info!(
            "Restore declined: {} actions applied, {} not applied",
            self.report.applied.len(),
            self.report.not_applied.len()
        );
        self.report
    }
}

/// A run executing on a worker thread.
#[derive(Debug)]
pub struct RunHandle {
    pub events: Receiver<ProgressEvent>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<RunOutcome>>,
}

impl RunHandle {
    /// Asks the run to stop at the next file boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Waits for the run to end.
    pub fn join(self) -> Result<RunOutcome> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LEDGER_FILE;
    use tempfile::TempDir;

    struct Setup {
        tree: TempDir,
        backups: TempDir,
        orchestrator: Orchestrator,
    }

    fn setup() -> Setup {
        let tree = TempDir::new().expect("Failed to create temp directory");
        let backups = TempDir::new().expect("Failed to create backup directory");
        let orchestrator = Orchestrator::new(&Config::default())
            .unwrap()
            .with_backup_root(backups.path());
        Setup {
            tree,
            backups,
            orchestrator,
        }
    }

    fn completed(outcome: RunOutcome) -> RunReport {
        match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::Failed(failed) => panic!("run failed: {}", failed.error()),
        }
    }

    #[test]
    fn test_parse_operation() {
        assert_eq!(
            Operation::parse("sort-by-date", None, None).unwrap(),
            Operation::SortByDate {
                pattern: "%Y-%m".to_string()
            }
        );
        assert_eq!(
            Operation::parse("dedupe", None, Some("delete")).unwrap(),
            Operation::Dedupe {
                disposition: Disposition::Delete
            }
        );
        assert!(matches!(
            Operation::parse("shuffle", None, None),
            Err(ValidationError::UnknownOperation(_))
        ));
        assert!(matches!(
            Operation::parse("dedupe", None, Some("shred")),
            Err(ValidationError::UnknownDisposition(_))
        ));
    }

    #[test]
    fn test_missing_directory_rejected() {
        let s = setup();
        let request = OperationRequest::new(s.tree.path().join("nope"), Operation::SortByType);
        let result = s.orchestrator.prepare(request);
        assert!(matches!(
            result,
            Err(TidyError::Validation(ValidationError::Inaccessible { .. }))
        ));
    }

    #[test]
    fn test_file_target_rejected() {
        let s = setup();
        let file = s.tree.path().join("a.txt");
        fs::write(&file, "a").unwrap();
        let result = s
            .orchestrator
            .prepare(OperationRequest::new(&file, Operation::SortByType));
        assert!(matches!(
            result,
            Err(TidyError::Validation(ValidationError::NotADirectory(_)))
        ));
    }

    #[test]
    fn test_bad_date_pattern_rejected_before_io() {
        let s = setup();
        fs::write(s.tree.path().join("a.txt"), "a").unwrap();
        let request = OperationRequest::new(
            s.tree.path(),
            Operation::SortByDate {
                pattern: "../%Y".to_string(),
            },
        );
        assert!(s.orchestrator.run(request).is_err());
        assert!(s.tree.path().join("a.txt").exists());
        assert!(!s.tree.path().join(LEDGER_FILE).exists());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();

        let prepared = s
            .orchestrator
            .prepare(OperationRequest::new(root, Operation::SortByType).dry_run(true))
            .unwrap();
        assert_eq!(prepared.state(), RunState::Done);
        assert_eq!(prepared.actions().len(), 1);

        let report = completed(prepared.execute());
        assert!(report.dry_run);
        assert!(report.outcome.is_none());
        assert!(report.applied.is_empty());
        assert!(root.join("a.txt").exists());
        assert!(!root.join(LEDGER_FILE).exists());
        assert_eq!(fs::read_dir(s.orchestrator.backups().root()).unwrap().count(), 0);
    }

    #[test]
    fn test_sort_records_success_with_snapshot() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();

        let report = completed(
            s.orchestrator
                .run(OperationRequest::new(root, Operation::SortByType))
                .unwrap(),
        );
        assert_eq!(report.outcome, Some(Outcome::Success));
        assert_eq!(report.applied.len(), 1);
        assert!(root.join("txt").join("a.txt").exists());

        let records = Ledger::open(root).records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(records[0].snapshot, report.snapshot);
        assert!(report.snapshot.is_some());
    }

    #[test]
    fn test_empty_plan_takes_no_snapshot() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("only.txt"), "unique").unwrap();

        let report = completed(
            s.orchestrator
                .run(OperationRequest::new(
                    root,
                    Operation::Dedupe {
                        disposition: Disposition::Delete,
                    },
                ))
                .unwrap(),
        );
        assert!(report.planned.is_empty());
        assert!(report.snapshot.is_none());
        assert_eq!(Ledger::open(root).records().unwrap().len(), 1);
    }

    #[test]
    fn test_repeat_run_warns_but_proceeds() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();

        let request = OperationRequest::new(root, Operation::SortByType);
        completed(s.orchestrator.run(request.clone()).unwrap());
        let second = completed(s.orchestrator.run(request).unwrap());

        assert_eq!(second.warnings.len(), 1);
        assert!(second.warnings[0].contains("already ran"));
        assert!(second.planned.is_empty());
    }

    #[test]
    fn test_unwritable_history_only_warns() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();
        let ledger_path = root.join(LEDGER_FILE);
        fs::write(&ledger_path, "{ not json").unwrap();

        let report = completed(
            s.orchestrator
                .run(OperationRequest::new(root, Operation::SortByType))
                .unwrap(),
        );

        assert_eq!(report.outcome, Some(Outcome::Success));
        assert!(root.join("txt").join("a.txt").exists());
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.starts_with("History not recorded"))
        );
        assert_eq!(fs::read_to_string(&ledger_path).unwrap(), "{ not json");
    }

    #[test]
    fn test_backup_failure_leaves_tree_untouched() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();
        let blocker = s.backups.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let orchestrator = s.orchestrator.clone().with_backup_root(&blocker);
        let outcome = orchestrator
            .run(OperationRequest::new(root, Operation::SortByType))
            .unwrap();

        let RunOutcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(failed.error(), TidyError::Backup(_)));
        assert!(failed.snapshot().is_none());
        assert_eq!(failed.state(), RunState::Failed);
        assert!(root.join("a.txt").exists());
        assert!(!root.join("txt").exists());
        assert_eq!(failed.report().not_applied.len(), 1);

        let records = Ledger::open(root).records().unwrap();
        assert_eq!(records[0].outcome, Outcome::Failed);

        let report = failed.decline();
        assert!(report.applied.is_empty());
    }

    #[test]
    fn test_cancelled_run_is_failed_and_restorable() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("b.txt"), "b").unwrap();

        let prepared = s
            .orchestrator
            .prepare(OperationRequest::new(root, Operation::SortByType))
            .unwrap();
        s.orchestrator.cancel_flag().store(true, Ordering::SeqCst);

        let RunOutcome::Failed(failed) = prepared.execute() else {
            panic!("expected cancellation");
        };
        assert!(matches!(failed.error(), TidyError::Cancelled));
        assert_eq!(failed.report().not_applied.len(), 2);

        let restored = failed.restore().unwrap();
        assert!(restored.is_complete_success());
        assert!(root.join("a.txt").exists());
        assert!(!root.join("txt").exists());
    }

    #[test]
    fn test_dedupe_move_to_excludes_quarantine() {
        let s = setup();
        let root = s.tree.path();
        fs::create_dir(root.join("dupes")).unwrap();
        fs::write(root.join("dupes").join("old.txt"), "same").unwrap();
        fs::write(root.join("a.txt"), "same").unwrap();
        fs::write(root.join("b.txt"), "same").unwrap();

        let request = OperationRequest::new(
            root,
            Operation::Dedupe {
                disposition: Disposition::MoveTo(PathBuf::from("dupes")),
            },
        )
        .recursive(true);
        let report = completed(s.orchestrator.run(request).unwrap());

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].members.len(), 2);
        assert!(root.join("a.txt").exists());
        assert!(!root.join("b.txt").exists());
        assert!(root.join("dupes").join("b.txt").exists());
    }

    #[test]
    fn test_spawn_streams_ordered_events() {
        let s = setup();
        let root = s.tree.path();
        fs::write(root.join("a.txt"), "a").unwrap();

        let handle = s
            .orchestrator
            .clone()
            .spawn(OperationRequest::new(root, Operation::SortByType));
        let mut states = Vec::new();
        let mut applied = 0;
        for event in handle.events.iter() {
            match event {
                ProgressEvent::StateChanged { to, .. } => states.push(to),
                ProgressEvent::ActionApplied { .. } => applied += 1,
                ProgressEvent::Finished { outcome } => {
                    assert_eq!(outcome, Outcome::Success);
                    break;
                }
                _ => {}
            }
        }
        let outcome = handle.join().unwrap();

        assert!(!outcome.is_failed());
        assert_eq!(applied, 1);
        assert_eq!(
            states,
            vec![
                RunState::Validating,
                RunState::CheckingHistory,
                RunState::BackingUp,
                RunState::Executing,
                RunState::Recording,
                RunState::Done,
            ]
        );
    }
}
