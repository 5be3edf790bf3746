//! Duplicate grouping and removal planning.
//!
//! Records sharing size and fingerprint form a group. The first member
//! discovered during the scan is kept; every later member is a removal
//! candidate, handled according to the configured [`Disposition`].

use crate::classifier::unique_destination;
use crate::fingerprint::Fingerprint;
use crate::mutator::{Disposition, PlannedAction};
use crate::scanner::FileRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A set of byte-identical files, in discovery order.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    fingerprint: Fingerprint,
    size: u64,
    members: Vec<FileRecord>,
}

impl DuplicateGroup {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn members(&self) -> &[FileRecord] {
        &self.members
    }

    /// The member that is retained: the first one discovered.
    pub fn keeper(&self) -> &FileRecord {
        &self.members[0]
    }

    /// Members that may be removed, in discovery order.
    pub fn removals(&self) -> &[FileRecord] {
        &self.members[1..]
    }

    pub fn report(&self) -> GroupReport {
        GroupReport {
            fingerprint: self.fingerprint.to_hex(),
            size: self.size,
            members: self
                .members
                .iter()
                .enumerate()
                .map(|(i, record)| MemberReport {
                    path: record.path().to_path_buf(),
                    retained: i == 0,
                })
                .collect(),
        }
    }
}

/// Serializable view of a group for reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GroupReport {
    pub fingerprint: String,
    pub size: u64,
    pub members: Vec<MemberReport>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemberReport {
    pub path: PathBuf,
    pub retained: bool,
}

/// Groups hashed records by content.
///
/// Records without a hash are ignored. Groups are ordered by the discovery
/// position of their first member and only groups with two or more members
/// are returned.
pub fn group(records: &[FileRecord]) -> Vec<DuplicateGroup> {
    let mut index: HashMap<(u64, Fingerprint), usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for record in records {
        let Some(hash) = record.hash() else {
            continue;
        };
        let key = (record.size(), *hash);
        match index.get(&key) {
            Some(&idx) => groups[idx].members.push(record.clone()),
            None => {
                index.insert(key, groups.len());
                groups.push(DuplicateGroup {
                    fingerprint: *hash,
                    size: record.size(),
                    members: vec![record.clone()],
                });
            }
        }
    }

    groups.retain(|group| group.members.len() >= 2);
    groups
}

/// Turns duplicate groups into mutator actions for the given disposition.
///
/// Quarantine destinations get the same numeric-suffix collision handling as
/// sorting, resolved in discovery order.
pub fn plan_removals(groups: &[DuplicateGroup], disposition: &Disposition) -> Vec<PlannedAction> {
    match disposition {
        Disposition::ReportOnly => Vec::new(),
        Disposition::Delete => groups
            .iter()
            .flat_map(|group| group.removals())
            .map(|record| PlannedAction::Delete {
                path: record.path().to_path_buf(),
            })
            .collect(),
        Disposition::MoveTo(quarantine) => {
            let mut claimed = HashSet::new();
            groups
                .iter()
                .flat_map(|group| group.removals())
                .filter_map(|record| {
                    let to = quarantine_destination(quarantine, record.path(), &mut claimed)?;
                    Some(PlannedAction::Move {
                        from: record.path().to_path_buf(),
                        to,
                    })
                })
                .collect()
        }
    }
}

fn quarantine_destination(
    quarantine: &Path,
    source: &Path,
    claimed: &mut HashSet<PathBuf>,
) -> Option<PathBuf> {
    let file_name = source.file_name()?;
    let destination = unique_destination(&quarantine.join(file_name), source, claimed);
    claimed.insert(destination.clone());
    Some(destination)
}
