/// Pre-mutation snapshots and restore.
///
/// A snapshot copies every file a run is about to touch into its own
/// directory under the backup root, alongside a JSON manifest mapping each
/// original path to its copy. It also lists the files and directories the run
/// will create, so a restore can remove them and leave no residue behind.
use crate::error::BackupError;
use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const MANIFEST_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";

/// One backed-up file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub original: PathBuf,
    pub backup: PathBuf,
}

/// A completed, restorable backup of the files a run will touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub entries: Vec<ManifestEntry>,
    /// Files the run actually created; removed on restore.
    #[serde(default)]
    pub created_files: Vec<PathBuf>,
    /// Directories missing when the snapshot was taken, shallowest first;
    /// removed on restore if empty.
    #[serde(default)]
    pub created_dirs: Vec<PathBuf>,
    /// Directory holding this snapshot's manifest and copies.
    #[serde(skip)]
    pub location: PathBuf,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Represents the result of a restore.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Number of files copied back to their original location.
    pub restored_files: usize,
    /// Number of files created by the run that were removed.
    pub removed_files: usize,
    /// Files that could not be restored or removed.
    pub failures: Vec<(PathBuf, String)>,
}

impl RestoreReport {
    /// Returns true if the restore was completely successful.
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Creates, loads, restores and discards snapshots under one backup root.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    /// A relative `root` is resolved against the current directory now, so
    /// manifests never hold relative paths.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// `<data_local_dir>/tidyguard/backups`, or the temp dir if unavailable.
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("tidyguard").join("backups"))
            .unwrap_or_else(|| std::env::temp_dir().join("tidyguard-backups"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies every path in `affected` into a new snapshot.
    ///
    /// Fails as a whole: if any copy fails, the partial snapshot directory is
    /// removed and an error is returned. `planned` lists the paths the pending
    /// run may create; their missing parent directories are recorded. Files
    /// are only listed as created once [`BackupManager::record_created`] says
    /// so.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tidyguard::backup::BackupManager;
    /// use std::path::{Path, PathBuf};
    ///
    /// let manager = BackupManager::new("/var/backups/tidyguard");
    /// let snapshot = manager.snapshot(
    ///     Path::new("/home/me/Downloads"),
    ///     &[PathBuf::from("/home/me/Downloads/report.pdf")],
    ///     &[PathBuf::from("/home/me/Downloads/pdf/report.pdf")],
    /// );
    /// match snapshot {
    ///     Ok(s) => println!("Snapshot {} holds {} files", s.id, s.len()),
    ///     Err(e) => eprintln!("Backup failed, nothing was changed: {}", e),
    /// }
    /// ```
    pub fn snapshot(
        &self,
        source_root: &Path,
        affected: &[PathBuf],
        planned: &[PathBuf],
    ) -> Result<Snapshot, BackupError> {
        let (id, location) = self.allocate(source_root)?;

        match self.fill(&id, &location, source_root, affected, planned) {
            Ok(snapshot) => {
                info!(
                    "Snapshot {} created with {} files at {}",
                    snapshot.id,
                    snapshot.len(),
                    location.display()
                );
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&location) {
                    warn!(
                        "Could not remove incomplete snapshot {}: {}",
                        location.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    fn allocate(&self, source_root: &Path) -> Result<(String, PathBuf), BackupError> {
        let label = source_root
            .file_name()
            .map(|n| n.to_string_lossy().replace(char::is_whitespace, "_"))
            .unwrap_or_else(|| "root".to_string());
        let stamp = Local::now().format("%Y%m%d-%H%M%S%3f");

        fs::create_dir_all(&self.root).map_err(|e| BackupError::CreateDir {
            path: self.root.clone(),
            source: e,
        })?;

        let mut attempt = 0;
        loop {
            let id = if attempt == 0 {
                format!("{}-{}", stamp, label)
            } else {
                format!("{}-{}-{}", stamp, label, attempt)
            };
            let location = self.root.join(&id);
            match fs::create_dir(&location) {
                Ok(()) => return Ok((id, location)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(BackupError::CreateDir {
                        path: location,
                        source: e,
                    });
                }
            }
        }
    }

    fn fill(
        &self,
        id: &str,
        location: &Path,
        source_root: &Path,
        affected: &[PathBuf],
        planned: &[PathBuf],
    ) -> Result<Snapshot, BackupError> {
        let files_dir = location.join(FILES_DIR);
        let mut entries = Vec::with_capacity(affected.len());

        for original in affected {
            let relative =
                original
                    .strip_prefix(source_root)
                    .map_err(|_| BackupError::OutsideRoot {
                        path: original.clone(),
                        root: source_root.to_path_buf(),
                    })?;
            let backup = files_dir.join(relative);
            copy_exact(original, &backup).map_err(|e| BackupError::Copy {
                path: original.clone(),
                source: e,
            })?;
            debug!("Backed up {}", original.display());
            entries.push(ManifestEntry {
                original: original.clone(),
                backup,
            });
        }

        let snapshot = Snapshot {
            version: MANIFEST_VERSION,
            id: id.to_string(),
            created_at: Utc::now(),
            source_root: source_root.to_path_buf(),
            entries,
            created_files: Vec::new(),
            created_dirs: missing_parent_dirs(planned),
            location: location.to_path_buf(),
        };
        write_manifest(&snapshot, &location.join(MANIFEST_FILE))?;
        Ok(snapshot)
    }

    /// Records the files the run created and rewrites the manifest.
    ///
    /// Only these are removed on restore. A planned destination whose move
    /// never ran may hold someone else's file.
    pub fn record_created(
        &self,
        snapshot: &mut Snapshot,
        created: Vec<PathBuf>,
    ) -> Result<(), BackupError> {
        snapshot.created_files = created;
        write_manifest(snapshot, &snapshot.location.join(MANIFEST_FILE))
    }

    /// Loads a snapshot by id.
    pub fn load(&self, id: &str) -> Result<Snapshot, BackupError> {
        let location = self.root.join(id);
        let manifest = location.join(MANIFEST_FILE);
        if !manifest.exists() {
            return Err(BackupError::NotFound(id.to_string()));
        }
        let json = fs::read_to_string(&manifest).map_err(|e| BackupError::ManifestRead {
            path: manifest.clone(),
            reason: e.to_string(),
        })?;
        let mut snapshot: Snapshot =
            serde_json::from_str(&json).map_err(|e| BackupError::ManifestRead {
                path: manifest.clone(),
                reason: e.to_string(),
            })?;
        snapshot.location = location;
        Ok(snapshot)
    }

    /// Returns the tree to its state when `snapshot` was taken.
    ///
    /// Removes files the run created, copies every manifest entry back over
    /// its original path, then removes directories the run created if they
    /// are empty. Per-file problems are collected in the report rather than
    /// stopping the restore.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<RestoreReport, BackupError> {
        if !snapshot.location.is_dir() {
            return Err(BackupError::NotFound(snapshot.id.clone()));
        }

        let mut report = RestoreReport::default();
        let originals: HashSet<&Path> = snapshot
            .entries
            .iter()
            .map(|e| e.original.as_path())
            .collect();

        for created in snapshot.created_files.iter().rev() {
            if originals.contains(created.as_path()) || fs::symlink_metadata(created).is_err() {
                continue;
            }
            match fs::remove_file(created) {
                Ok(()) => report.removed_files += 1,
                Err(e) => report
                    .failures
                    .push((created.clone(), format!("Could not remove: {}", e))),
            }
        }

        for entry in &snapshot.entries {
            match copy_exact(&entry.backup, &entry.original) {
                Ok(()) => report.restored_files += 1,
                Err(e) => report
                    .failures
                    .push((entry.original.clone(), format!("Failed to restore file: {}", e))),
            }
        }

        for dir in snapshot.created_dirs.iter().rev() {
            // Only empty directories are removed; anything else stays.
            let _ = fs::remove_dir(dir);
        }

        info!(
            "Restored {} files from snapshot {} ({} created files removed, {} failures)",
            report.restored_files,
            snapshot.id,
            report.removed_files,
            report.failures.len()
        );
        Ok(report)
    }

    /// Deletes a snapshot and its copies.
    pub fn discard(&self, snapshot: &Snapshot) -> Result<(), BackupError> {
        fs::remove_dir_all(&snapshot.location).map_err(|e| BackupError::Remove {
            path: snapshot.location.clone(),
            source: e,
        })
    }
}

/// Copies `from` to `to`, creating parents, and checks the byte count.
fn copy_exact(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    let copied = fs::copy(from, to)?;
    let expected = fs::metadata(from)?.len();
    if copied != expected {
        return Err(std::io::Error::other(format!(
            "copied {} of {} bytes",
            copied, expected
        )));
    }
    Ok(())
}

fn write_manifest(snapshot: &Snapshot, path: &Path) -> Result<(), BackupError> {
    let json = serde_json::to_string_pretty(snapshot).map_err(|e| BackupError::ManifestWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, json).map_err(|e| BackupError::ManifestWrite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Ancestors of `paths` that do not exist yet, shallowest first.
fn missing_parent_dirs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();
    for path in paths {
        let mut missing: Vec<PathBuf> = path
            .ancestors()
            .skip(1)
            .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
            .map(Path::to_path_buf)
            .collect();
        missing.reverse();
        for dir in missing {
            if seen.insert(dir.clone()) {
                dirs.push(dir);
            }
        }
    }
    dirs.sort_by_key(|d| d.components().count());
    dirs
}
