//! Directory walking.
//!
//! A [`Scanner`] yields one [`ScanEntry`] per non-hidden entry under a root.
//! The walk is lazy and sorted by file name so two scans of the same tree
//! produce the same order. Symbolic links are reported but never followed,
//! and unreadable entries become warnings rather than errors.

use crate::config::CompiledFilters;
use crate::error::ScanError;
use chrono::{DateTime, Utc};
use log::{trace, warn};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file discovered during a scan.
///
/// Records are immutable; attaching a content hash produces a new record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    path: PathBuf,
    size: u64,
    modified: DateTime<Utc>,
    hash: Option<crate::fingerprint::Fingerprint>,
}

impl FileRecord {
    pub fn new(path: PathBuf, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path,
            size,
            modified,
            hash: None,
        }
    }

    fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        Self::new(path, metadata.len(), modified)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn hash(&self) -> Option<&crate::fingerprint::Fingerprint> {
        self.hash.as_ref()
    }

    /// Returns a copy of this record carrying the given content hash.
    pub fn with_hash(&self, hash: crate::fingerprint::Fingerprint) -> Self {
        Self {
            hash: Some(hash),
            ..self.clone()
        }
    }
}

/// One item produced by a walk.
#[derive(Debug)]
pub enum ScanEntry {
    /// A regular file.
    File(FileRecord),
    /// A symbolic link. Recorded, never descended into or hashed.
    Symlink(PathBuf),
    /// An entry that could not be read.
    Skipped(ScanError),
}

/// Restartable walk over a directory root.
#[derive(Clone)]
pub struct Scanner<'a> {
    root: PathBuf,
    recursive: bool,
    filters: Option<&'a CompiledFilters>,
    excluded: Vec<PathBuf>,
}

impl<'a> Scanner<'a> {
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
            filters: None,
            excluded: Vec::new(),
        }
    }

    /// Applies include/exclude filter rules to regular files.
    pub fn with_filters(mut self, filters: &'a CompiledFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Never yields anything at or below `dir`.
    ///
    /// `dir` is also compared in canonical form, so relative paths and paths
    /// through symlinks or `..` still match what the walk yields.
    pub fn exclude_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let resolved = fs::canonicalize(&dir).or_else(|_| std::path::absolute(&dir));
        if let Ok(resolved) = resolved
            && resolved != dir
        {
            self.excluded.push(resolved);
        }
        self.excluded.push(dir);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Starts a fresh walk. Each call re-reads the filesystem.
    pub fn iter(&self) -> ScanIter<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .max_depth(if self.recursive { usize::MAX } else { 1 })
            .sort_by_file_name()
            .into_iter();
        ScanIter {
            scanner: self,
            inner: walker,
        }
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        self.excluded.iter().any(|dir| path.starts_with(dir))
    }
}

/// Convenience wrapper: walk `root` with no filters.
pub fn walk(root: &Path, recursive: bool) -> Scanner<'static> {
    Scanner::new(root, recursive)
}

/// Iterator returned by [`Scanner::iter`].
pub struct ScanIter<'s> {
    scanner: &'s Scanner<'s>,
    inner: walkdir::IntoIter,
}

impl Iterator for ScanIter<'_> {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.scanner.root.clone());
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
                    warn!("Skipping {}: {}", path.display(), source);
                    return Some(ScanEntry::Skipped(ScanError::Unreadable { path, source }));
                }
            };

            if is_hidden(&entry) || self.scanner.is_excluded_dir(entry.path()) {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if file_type.is_symlink() {
                trace!("Recording symlink {}", entry.path().display());
                return Some(ScanEntry::Symlink(entry.into_path()));
            }
            if !file_type.is_file() {
                continue;
            }

            if let Some(filters) = self.scanner.filters {
                let relative = entry
                    .path()
                    .strip_prefix(&self.scanner.root)
                    .unwrap_or(entry.path());
                if !filters.should_include(relative) {
                    trace!("Filtered out {}", entry.path().display());
                    continue;
                }
            }

            return Some(match entry.metadata() {
                Ok(metadata) => {
                    ScanEntry::File(FileRecord::from_metadata(entry.into_path(), &metadata))
                }
                Err(err) => {
                    let path = entry.into_path();
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                    warn!("Skipping {}: {}", path.display(), source);
                    ScanEntry::Skipped(ScanError::Unreadable { path, source })
                }
            });
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
