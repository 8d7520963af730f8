//! Snapshot enumeration
//!
//! Turns whatever the filesystem-introspection capability reports into the
//! strictly ordered snapshot sequence the planner relies on.

use crate::capability::SnapshotSource;
use crate::error::{Error, Result};
use crate::model::{LocalSnapshot, Subvolume};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Read-only snapshots of the subvolume at `path`, oldest first
pub async fn list_snapshots(source: &dyn SnapshotSource, path: &Path) -> Result<Vec<LocalSnapshot>> {
    let subvolume = source.subvolume(path).await?;
    snapshots_of(source, &subvolume).await
}

/// Read-only snapshots of an already resolved subvolume, oldest first
///
/// Ties on creation time are broken by relative path so the order never
/// depends on how the capability happened to list them.
pub async fn snapshots_of(
    source: &dyn SnapshotSource,
    subvolume: &Subvolume,
) -> Result<Vec<LocalSnapshot>> {
    debug!(
        "Looking for readonly snapshots of {:?} which has uuid {}",
        subvolume.path, subvolume.uuid
    );

    let mut snapshots = source.list_read_only_snapshots(subvolume).await?;

    let mut seen = HashSet::new();
    for snapshot in &snapshots {
        if !seen.insert(snapshot.identity()) {
            return Err(Error::filesystem_access(
                &subvolume.path,
                format!("snapshot {} listed twice", snapshot),
            ));
        }
    }

    snapshots.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    debug!("Found {} readonly snapshots", snapshots.len());
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use uuid::Uuid;

    struct FixedSource {
        snapshots: Vec<LocalSnapshot>,
    }

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn subvolume(&self, path: &Path) -> Result<Subvolume> {
            if path != Path::new("/fs/home") {
                return Err(Error::filesystem_access(path, "not a btrfs subvolume"));
            }
            Ok(Subvolume {
                path: path.to_path_buf(),
                mount_root: PathBuf::from("/fs"),
                relative_path: "home".to_string(),
                uuid: Uuid::from_u128(1),
                filesystem_uuid: Uuid::from_u128(2),
            })
        }

        async fn list_read_only_snapshots(&self, _: &Subvolume) -> Result<Vec<LocalSnapshot>> {
            Ok(self.snapshots.clone())
        }
    }

    fn snap(path: &str, secs: i64) -> LocalSnapshot {
        LocalSnapshot {
            filesystem_uuid: Uuid::from_u128(2),
            relative_path: path.to_string(),
            absolute_path: PathBuf::from("/fs").join(path),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_sorted_by_creation_time() {
        let source = FixedSource {
            snapshots: vec![snap("snapshots/c", 30), snap("snapshots/a", 10), snap("snapshots/b", 20)],
        };
        let listed = list_snapshots(&source, Path::new("/fs/home")).await.unwrap();
        let paths: Vec<_> = listed.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["snapshots/a", "snapshots/b", "snapshots/c"]);
    }

    #[tokio::test]
    async fn test_ties_broken_by_path() {
        let source = FixedSource {
            snapshots: vec![snap("snapshots/y", 10), snap("snapshots/x", 10)],
        };
        let listed = list_snapshots(&source, Path::new("/fs/home")).await.unwrap();
        assert_eq!(listed[0].relative_path, "snapshots/x");
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let source = FixedSource {
            snapshots: vec![snap("snapshots/a", 10), snap("snapshots/a", 10)],
        };
        let err = list_snapshots(&source, Path::new("/fs/home")).await.unwrap_err();
        assert!(matches!(err, Error::FilesystemAccess { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_path_propagates() {
        let source = FixedSource { snapshots: vec![] };
        let err = list_snapshots(&source, Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, Error::FilesystemAccess { .. }));
    }
}
