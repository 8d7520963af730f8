//! Staged artifacts and their on-disk lifetime

use std::io;
use std::path::{Path, PathBuf};
use sv_core::SnapshotName;
use tracing::{debug, warn};

/// One transfer's bytes, staged under the work directory
///
/// The file belongs to this value and is removed when it is dropped, whether
/// the upload succeeded, failed or never happened.
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    name: SnapshotName,
    len: u64,
}

impl StagedArtifact {
    pub(crate) fn new(path: PathBuf, name: SnapshotName, len: u64) -> Self {
        Self { path, name, len }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote name the artifact is meant for
    pub fn name(&self) -> &SnapshotName {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged artifact {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged artifact {:?}: {}", self.path, e),
        }
    }
}

/// A `.partial` file being written; removed on drop unless persisted
#[derive(Debug)]
pub(crate) struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    /// Create (or truncate) the partial file
    pub(crate) async fn create(path: PathBuf) -> io::Result<(Self, tokio::fs::File)> {
        let file = tokio::fs::File::create(&path).await?;
        Ok((
            Self {
                path,
                persisted: false,
            },
            file,
        ))
    }

    /// Rename into place; from here on the caller owns `target`
    pub(crate) async fn persist(mut self, target: &Path) -> io::Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial file {:?}: {}", self.path, e);
            }
        }
    }
}
