//! Move planning for sort-by-type and sort-by-date.
//!
//! Planning is pure with respect to the filesystem: it reads which paths
//! exist but never changes anything. Collisions are resolved in scan order by
//! appending `_1`, `_2`, ... before the extension, so the same tree always
//! produces the same plan.

use crate::error::ValidationError;
use crate::mutator::PlannedAction;
use crate::scanner::FileRecord;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use log::debug;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Directory used for files without an extension.
pub const NO_EXTENSION_DIR: &str = "no_extension";

/// Default date bucketing pattern (year-month).
pub const DEFAULT_DATE_PATTERN: &str = "%Y-%m";

/// One planned move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Ordered list of planned moves.
///
/// Destinations are pairwise unique and each source appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationPlan {
    entries: Vec<PlanEntry>,
}

impl ClassificationPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The plan as mutator actions, in plan order.
    pub fn actions(&self) -> Vec<PlannedAction> {
        self.entries
            .iter()
            .map(|entry| PlannedAction::Move {
                from: entry.source.clone(),
                to: entry.destination.clone(),
            })
            .collect()
    }
}

/// Bucket name for sort-by-type: the lowercased extension, or `no_extension`.
pub fn extension_bucket(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| NO_EXTENSION_DIR.to_string())
}

/// Bucket name for sort-by-date, formatted in local time.
pub fn date_bucket(modified: DateTime<Utc>, pattern: &str) -> String {
    modified.with_timezone(&Local).format(pattern).to_string()
}

/// Checks that `pattern` is a strftime pattern yielding a relative path.
pub fn validate_date_pattern(pattern: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidDatePattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if pattern.trim().is_empty() {
        return Err(invalid("pattern is empty"));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(invalid("unrecognised format specifier"));
    }

    let sample = date_bucket(DateTime::<Utc>::from(std::time::UNIX_EPOCH), pattern);
    let sample_path = Path::new(&sample);
    if sample_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(invalid("bucket must be a relative path without '..'"));
    }
    Ok(())
}

/// Plans `root/<extension>/<file name>` moves.
pub fn plan_sort_by_type(root: &Path, records: &[FileRecord]) -> ClassificationPlan {
    plan_with(root, records, |record| extension_bucket(record.path()))
}

/// Plans `root/<date bucket>/<file name>` moves using the modification time.
pub fn plan_sort_by_date(
    root: &Path,
    records: &[FileRecord],
    pattern: &str,
) -> Result<ClassificationPlan, ValidationError> {
    validate_date_pattern(pattern)?;
    Ok(plan_with(root, records, |record| {
        date_bucket(record.modified(), pattern)
    }))
}

fn plan_with<F>(root: &Path, records: &[FileRecord], bucket_of: F) -> ClassificationPlan
where
    F: Fn(&FileRecord) -> String,
{
    let mut plan = ClassificationPlan::default();
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut bucket_dirs: HashMap<String, PathBuf> = HashMap::new();
    let mut sources: HashSet<PathBuf> = HashSet::new();

    for record in records {
        let source = record.path();
        let Some(file_name) = source.file_name() else {
            continue;
        };
        if !sources.insert(source.to_path_buf()) {
            continue;
        }

        let bucket = bucket_of(record);
        let bucket_dir = bucket_dirs
            .entry(bucket.clone())
            .or_insert_with(|| resolve_bucket_dir(root, &bucket))
            .clone();

        let destination = unique_destination(&bucket_dir.join(file_name), source, &claimed);
        if destination == source {
            continue;
        }
        claimed.insert(destination.clone());
        plan.entries.push(PlanEntry {
            source: source.to_path_buf(),
            destination,
        });
    }

    debug!("Planned {} moves under {}", plan.len(), root.display());
    plan
}

/// A bucket directory that already exists as a regular file gets a suffix.
fn resolve_bucket_dir(root: &Path, bucket: &str) -> PathBuf {
    let dir = root.join(bucket);
    let mut index = 1;
    let mut candidate = dir.clone();
    while fs::symlink_metadata(&candidate)
        .map(|m| !m.is_dir())
        .unwrap_or(false)
    {
        candidate = with_suffix(&dir, index);
        index += 1;
    }
    candidate
}

/// First free path among `candidate`, `candidate_1`, `candidate_2`, ...
///
/// A path is free when nothing exists there and no earlier plan entry claimed
/// it. The source's own path counts as free (the file is already in place).
pub fn unique_destination(candidate: &Path, source: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let is_free = |path: &Path| {
        path == source || (!claimed.contains(path) && fs::symlink_metadata(path).is_err())
    };

    if is_free(candidate) {
        return candidate.to_path_buf();
    }
    let mut index = 1;
    loop {
        let next = with_suffix(candidate, index);
        if is_free(&next) {
            return next;
        }
        index += 1;
    }
}

/// `a.txt` -> `a_1.txt`, `z` -> `z_1`.
fn with_suffix(path: &Path, index: usize) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let mut name = OsString::from(stem);
    name.push(format!("_{}", index));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(path: PathBuf) -> FileRecord {
        FileRecord::new(path, 1, Utc::now())
    }

    fn destinations(plan: &ClassificationPlan) -> Vec<PathBuf> {
        plan.entries().iter().map(|e| e.destination.clone()).collect()
    }

    #[test]
    fn test_extension_bucket() {
        assert_eq!(extension_bucket(Path::new("x.txt")), "txt");
        assert_eq!(extension_bucket(Path::new("y.TXT")), "txt");
        assert_eq!(extension_bucket(Path::new("z")), NO_EXTENSION_DIR);
        assert_eq!(extension_bucket(Path::new("a.tar.gz")), "gz");
    }

    #[test]
    fn test_sort_by_type_keeps_original_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let records = vec![
            record(root.join("x.txt")),
            record(root.join("y.TXT")),
            record(root.join("z")),
        ];

        let plan = plan_sort_by_type(root, &records);
        assert_eq!(
            destinations(&plan),
            vec![
                root.join("txt").join("x.txt"),
                root.join("txt").join("y.TXT"),
                root.join(NO_EXTENSION_DIR).join("z"),
            ]
        );
    }

    #[test]
    fn test_collisions_resolve_in_scan_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::create_dir(root.join("sub")).unwrap();
        let records = vec![record(root.join("a.txt")), record(root.join("sub").join("a.txt"))];

        let plan = plan_sort_by_type(root, &records);
        assert_eq!(
            destinations(&plan),
            vec![root.join("txt").join("a.txt"), root.join("txt").join("a_1.txt")]
        );
    }

    #[test]
    fn test_existing_destination_gets_suffix() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::create_dir(root.join("txt")).unwrap();
        fs::write(root.join("txt").join("a.txt"), "old").unwrap();
        fs::write(root.join("txt").join("a_1.txt"), "older").unwrap();

        let plan = plan_sort_by_type(root, &[record(root.join("a.txt"))]);
        assert_eq!(destinations(&plan), vec![root.join("txt").join("a_2.txt")]);
    }

    #[test]
    fn test_files_already_in_place_are_not_planned() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::create_dir(root.join("txt")).unwrap();
        fs::write(root.join("txt").join("a.txt"), "a").unwrap();
        fs::write(root.join("txt").join("a_1.txt"), "b").unwrap();

        let records = vec![
            record(root.join("txt").join("a.txt")),
            record(root.join("txt").join("a_1.txt")),
        ];
        assert!(plan_sort_by_type(root, &records).is_empty());
    }

    #[test]
    fn test_bucket_dir_occupied_by_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("txt"), "a file named txt").unwrap();

        let plan = plan_sort_by_type(root, &[record(root.join("a.txt"))]);
        assert_eq!(destinations(&plan), vec![root.join("txt_1").join("a.txt")]);
    }

    #[test]
    fn test_sort_by_date_uses_modification_time() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let modified = Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap();
        let records = vec![FileRecord::new(root.join("photo.jpg"), 1, modified)];

        let plan = plan_sort_by_date(root, &records, "%Y/%m").unwrap();
        let bucket = date_bucket(modified, "%Y/%m");
        assert_eq!(
            destinations(&plan),
            vec![root.join(bucket).join("photo.jpg")]
        );
    }

    #[test]
    fn test_invalid_date_patterns_rejected() {
        assert!(validate_date_pattern("").is_err());
        assert!(validate_date_pattern("%Q").is_err());
        assert!(validate_date_pattern("../%Y").is_err());
        assert!(validate_date_pattern("/%Y").is_err());
        assert!(validate_date_pattern("%Y-%m-%d").is_ok());
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix(Path::new("/r/a.txt"), 1), PathBuf::from("/r/a_1.txt"));
        assert_eq!(with_suffix(Path::new("/r/z"), 2), PathBuf::from("/r/z_2"));
    }

    #[test]
    fn test_plan_converts_to_actions() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        let plan = plan_sort_by_type(root, &[record(root.join("a.md"))]);
        assert_eq!(
            plan.actions(),
            vec![PlannedAction::Move {
                from: root.join("a.md"),
                to: root.join("md").join("a.md"),
            }]
        );
    }
}
