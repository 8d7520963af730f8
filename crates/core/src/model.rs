//! Snapshot data model

use crate::naming::{self, InvalidName, SnapshotName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A btrfs subvolume whose read-only snapshots get archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subvolume {
    /// Absolute path of the subvolume on the host
    pub path: PathBuf,
    /// Absolute path where the filesystem's top-level tree is reachable
    pub mount_root: PathBuf,
    /// Path relative to the filesystem's top-level tree (empty for the top level)
    pub relative_path: String,
    /// UUID of the subvolume itself; snapshots name it as their parent
    pub uuid: Uuid,
    /// UUID of the containing btrfs filesystem
    pub filesystem_uuid: Uuid,
}

/// A read-only snapshot discovered on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalSnapshot {
    /// UUID of the containing btrfs filesystem
    pub filesystem_uuid: Uuid,
    /// Path relative to the filesystem's top-level tree
    pub relative_path: String,
    /// Absolute path on the host, handed to `btrfs send`
    pub absolute_path: PathBuf,
    /// Creation time, the chain ordering key
    pub created_at: DateTime<Utc>,
}

impl LocalSnapshot {
    /// Remote object name of this snapshot
    pub fn name(&self) -> Result<SnapshotName, InvalidName> {
        naming::encode(self.filesystem_uuid, &self.relative_path)
    }

    /// Identity of the snapshot: `(filesystem uuid, relative path)`
    pub fn identity(&self) -> (Uuid, &str) {
        (self.filesystem_uuid, &self.relative_path)
    }
}

impl fmt::Display for LocalSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<FS_TREE>/{}", self.relative_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Complete dump of the snapshot
    Full,
    /// Delta against the parent snapshot
    Incremental,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Full => f.write_str("full"),
            TransferKind::Incremental => f.write_str("incremental"),
        }
    }
}

/// One row of a sync plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTransfer {
    pub snapshot: LocalSnapshot,
    pub parent: Option<LocalSnapshot>,
    pub kind: TransferKind,
    /// Remote name the artifact is uploaded under
    pub name: SnapshotName,
}

impl PlannedTransfer {
    pub fn full(snapshot: LocalSnapshot, name: SnapshotName) -> Self {
        Self {
            snapshot,
            parent: None,
            kind: TransferKind::Full,
            name,
        }
    }

    pub fn incremental(snapshot: LocalSnapshot, parent: LocalSnapshot, name: SnapshotName) -> Self {
        Self {
            snapshot,
            parent: Some(parent),
            kind: TransferKind::Incremental,
            name,
        }
    }
}

impl fmt::Display for PlannedTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "changes between {} and {}", parent, self.snapshot),
            None => write!(f, "whole snapshot {}", self.snapshot),
        }
    }
}

/// Ordered list of transfers, oldest snapshot first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPlan {
    transfers: Vec<PlannedTransfer>,
}

impl SyncPlan {
    pub fn new(transfers: Vec<PlannedTransfer>) -> Self {
        Self { transfers }
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn transfers(&self) -> &[PlannedTransfer] {
        &self.transfers
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlannedTransfer> {
        self.transfers.iter()
    }
}

impl IntoIterator for SyncPlan {
    type Item = PlannedTransfer;
    type IntoIter = std::vec::IntoIter<PlannedTransfer>;

    fn into_iter(self) -> Self::IntoIter {
        self.transfers.into_iter()
    }
}

impl<'a> IntoIterator for &'a SyncPlan {
    type Item = &'a PlannedTransfer;
    type IntoIter = std::slice::Iter<'a, PlannedTransfer>;

    fn into_iter(self) -> Self::IntoIter {
        self.transfers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(path: &str) -> LocalSnapshot {
        LocalSnapshot {
            filesystem_uuid: Uuid::nil(),
            relative_path: path.to_string(),
            absolute_path: PathBuf::from("/fs").join(path),
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_snapshot_display() {
        assert_eq!(snapshot("snapshots/1").to_string(), "<FS_TREE>/snapshots/1");
    }

    #[test]
    fn test_transfer_display() {
        let s1 = snapshot("snapshots/1");
        let s2 = snapshot("snapshots/2");
        let full = PlannedTransfer::full(s1.clone(), s1.name().unwrap());
        assert_eq!(full.to_string(), "whole snapshot <FS_TREE>/snapshots/1");

        let inc = PlannedTransfer::incremental(s2.clone(), s1, s2.name().unwrap());
        assert_eq!(
            inc.to_string(),
            "changes between <FS_TREE>/snapshots/1 and <FS_TREE>/snapshots/2"
        );
        assert_eq!(inc.kind, TransferKind::Incremental);
    }

    #[test]
    fn test_snapshot_is_hashable() {
        let mut set = std::collections::HashSet::new();
        set.insert(snapshot("a"));
        set.insert(snapshot("a"));
        assert_eq!(set.len(), 1);
    }
}
