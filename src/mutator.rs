/// Filesystem mutation for planned moves and deletions.
///
/// This module is the only place that renames, copies over, or deletes user
/// files. Actions run strictly in plan order on the calling thread. A failing
/// action halts the run; actions already applied are reported, not reverted.
use crate::error::{MutationError, ValidationError};
use crate::fingerprint::compute_file_hash;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// What happens to the non-kept members of a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Disposition {
    /// List duplicates, change nothing.
    #[default]
    ReportOnly,
    /// Delete every non-kept member.
    Delete,
    /// Move every non-kept member into a quarantine directory.
    MoveTo(PathBuf),
}

impl FromStr for Disposition {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report-only" => Ok(Self::ReportOnly),
            "delete" => Ok(Self::Delete),
            _ => match s.strip_prefix("move-to:") {
                Some(dir) if !dir.is_empty() => Ok(Self::MoveTo(PathBuf::from(dir))),
                _ => Err(ValidationError::UnknownDisposition(s.to_string())),
            },
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReportOnly => f.write_str("report-only"),
            Self::Delete => f.write_str("delete"),
            Self::MoveTo(dir) => write!(f, "move-to:{}", dir.display()),
        }
    }
}

/// A single filesystem change the mutator may perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Move { from: PathBuf, to: PathBuf },
    Delete { path: PathBuf },
}

impl PlannedAction {
    /// The existing file this action changes.
    pub fn source(&self) -> &Path {
        match self {
            Self::Move { from, .. } => from,
            Self::Delete { path } => path,
        }
    }

    /// The path this action creates, if any.
    pub fn created(&self) -> Option<&Path> {
        match self {
            Self::Move { to, .. } => Some(to),
            Self::Delete { .. } => None,
        }
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move { from, to } => write!(f, "move {} -> {}", from.display(), to.display()),
            Self::Delete { path } => write!(f, "delete {}", path.display()),
        }
    }
}

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Single atomic rename on the same filesystem.
    Renamed,
    /// Copy, verify, then delete the original.
    CopiedAcrossDevices,
}

/// Why a run stopped before the end of the plan.
#[derive(Debug)]
pub enum Halt {
    Failed(MutationError),
    Cancelled,
}

/// What `apply` did.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Actions fully applied, in order.
    pub completed: Vec<PlannedAction>,
    /// Actions never applied (the failing one first, if any).
    pub not_applied: Vec<PlannedAction>,
    /// Set when the run did not reach the end of the plan.
    pub halted: Option<Halt>,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }
}

/// Applies actions in order, stopping at the first failure.
///
/// `cancel` is checked between actions only; an action in progress always
/// finishes or unwinds first. `on_applied` is called after each completed
/// action with its index in `actions`.
pub fn apply<F>(actions: &[PlannedAction], cancel: &AtomicBool, mut on_applied: F) -> ExecutionReport
where
    F: FnMut(usize, &PlannedAction),
{
    let mut report = ExecutionReport::default();

    for (index, action) in actions.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            info!("Cancellation honoured after {} actions", index);
            report.not_applied = actions[index..].to_vec();
            report.halted = Some(Halt::Cancelled);
            return report;
        }

        let result = match action {
            PlannedAction::Move { from, to } => move_file(from, to).map(|_| ()),
            PlannedAction::Delete { path } => delete_file(path),
        };

        match result {
            Ok(()) => {
                debug!("Applied {}", action);
                report.completed.push(action.clone());
                on_applied(index, action);
            }
            Err(e) => {
                warn!("Halting after {} of {} actions: {}", index, actions.len(), e);
                report.not_applied = actions[index..].to_vec();
                report.halted = Some(Halt::Failed(e));
                return report;
            }
        }
    }

    report
}

/// Moves `from` to `to`, creating parent directories as needed.
///
/// Never overwrites: an existing destination is an error. Falls back to
/// copy-verify-delete when the rename crosses filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<MoveMethod, MutationError> {
    if fs::symlink_metadata(to).is_ok() {
        return Err(MutationError::DestinationOccupied(to.to_path_buf()));
    }

    if let Some(parent) = to.parent()
        && !parent.is_dir()
    {
        fs::create_dir_all(parent).map_err(|e| MutationError::CreateDir {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(MoveMethod::Renamed),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(
                "{} and {} are on different filesystems, copying",
                from.display(),
                to.display()
            );
            copy_verify_remove(from, to)?;
            Ok(MoveMethod::CopiedAcrossDevices)
        }
        Err(e) => Err(MutationError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        }),
    }
}

/// Copies `from` to `to`, checks size and content hash, then removes `from`.
///
/// On any failure the copy is removed and `from` is left as it was.
pub fn copy_verify_remove(from: &Path, to: &Path) -> Result<(), MutationError> {
    if let Err(e) = fs::copy(from, to) {
        discard_partial(to);
        return Err(MutationError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        });
    }

    if !copies_match(from, to) {
        discard_partial(to);
        return Err(MutationError::VerificationFailed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }

    if let Err(e) = fs::remove_file(from) {
        discard_partial(to);
        return Err(MutationError::Delete {
            path: from.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

fn copies_match(a: &Path, b: &Path) -> bool {
    let size = |p: &Path| fs::metadata(p).map(|m| m.len()).ok();
    if size(a).is_none() || size(a) != size(b) {
        return false;
    }
    match (compute_file_hash(a), compute_file_hash(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

fn discard_partial(path: &Path) {
    if path.exists()
        && let Err(e) = fs::remove_file(path)
    {
        warn!("Could not remove partial copy {}: {}", path.display(), e);
    }
}

/// Deletes a single file.
pub fn delete_file(path: &Path) -> Result<(), MutationError> {
    fs::remove_file(path).map_err(|e| MutationError::Delete {
        path: path.to_path_buf(),
        source: e,
    })
}
