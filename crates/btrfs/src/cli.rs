//! `btrfs` tool backed snapshot source and sender

use crate::parse;
use crate::tool;
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use sv_core::{ByteStream, Error, LocalSnapshot, Result, SnapshotSender, SnapshotSource, Subvolume};
use tokio::process::Command;
use tracing::debug;

/// Drives the `btrfs` command line tool
#[derive(Debug, Clone)]
pub struct BtrfsCli {
    program: PathBuf,
}

impl BtrfsCli {
    /// Locate `btrfs` on `PATH`
    pub fn new() -> Result<Self> {
        Ok(Self::with_program(tool::locate("btrfs")?))
    }

    /// Use an explicit `btrfs` binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str], subject: &Path) -> Result<String> {
        tool::output(&self.program, args, subject).await
    }
}

#[async_trait]
impl SnapshotSource for BtrfsCli {
    async fn subvolume(&self, path: &Path) -> Result<Subvolume> {
        let path = absolute(path)?;
        let path_str = path.to_string_lossy();

        let show = self.run(&["subvolume", "show", &path_str], &path).await?;
        let show = parse::subvolume_show(&show).map_err(|e| Error::filesystem_access(&path, e))?;

        let fs = self.run(&["filesystem", "show", &path_str], &path).await?;
        let filesystem_uuid =
            parse::filesystem_uuid(&fs).map_err(|e| Error::filesystem_access(&path, e))?;

        let mount_root = mount_root(&path, &show.relative_path)
            .ok_or_else(|| {
                Error::filesystem_access(
                    &path,
                    format!("path does not end with its subvolume path {:?}", show.relative_path),
                )
            })?;
        debug!(
            "Given path {:?} with its relative part {:?}. root filesystem path is {:?}",
            path, show.relative_path, mount_root
        );

        Ok(Subvolume {
            path,
            mount_root,
            relative_path: show.relative_path,
            uuid: show.uuid,
            filesystem_uuid,
        })
    }

    async fn list_read_only_snapshots(&self, subvolume: &Subvolume) -> Result<Vec<LocalSnapshot>> {
        let path_str = subvolume.path.to_string_lossy();
        let listing = self
            .run(&["subvolume", "list", "-s", "-r", "-q", "-u", &path_str], &subvolume.path)
            .await?;
        let listed =
            parse::subvolume_list(&listing).map_err(|e| Error::filesystem_access(&subvolume.path, e))?;

        let snapshots = listed
            .into_iter()
            .filter(|entry| entry.parent_uuid == Some(subvolume.uuid))
            .map(|entry| LocalSnapshot {
                filesystem_uuid: subvolume.filesystem_uuid,
                absolute_path: subvolume.mount_root.join(&entry.path),
                relative_path: entry.path,
                created_at: local_to_utc(entry.otime),
            })
            .collect();
        Ok(snapshots)
    }
}

#[async_trait]
impl SnapshotSender for BtrfsCli {
    async fn send(&self, snapshot: &LocalSnapshot, parent: Option<&LocalSnapshot>) -> Result<ByteStream> {
        let mut command = Command::new(&self.program);
        command.arg("send");
        if let Some(parent) = parent {
            command.arg("-p").arg(&parent.absolute_path);
        }
        command
            .arg(&snapshot.absolute_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(snapshot = %snapshot, parent = ?parent.map(|p| p.to_string()), "starting btrfs send");
        let mut child = command
            .spawn()
            .map_err(|e| Error::preparation(snapshot, format!("Failed to execute btrfs send: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::preparation(snapshot, "btrfs send has no stdout"))?;
        let stderr = tool::drain_stderr(child.stderr.take());

        let label = snapshot.to_string();
        let completion = async move {
            let status = child.wait().await?;
            let stderr = stderr.await.unwrap_or_default();
            if status.success() {
                Ok(())
            } else {
                Err(Error::preparation(
                    label,
                    format!("Error happened during btrfs send ({}): {}", status, stderr.trim()),
                ))
            }
        };

        Ok(ByteStream::new(stdout, completion))
    }
}

/// Make `path` absolute and lexically normalized, without following symlinks
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Strip the subvolume's relative path off its absolute path
fn mount_root(path: &Path, relative_path: &str) -> Option<PathBuf> {
    if relative_path.is_empty() {
        return Some(path.to_path_buf());
    }

    let mut root = path.to_path_buf();
    for component in Path::new(relative_path).components().rev() {
        if root.file_name() != Some(component.as_os_str()) {
            return None;
        }
        root.pop();
    }
    Some(root)
}

/// `btrfs` prints creation times in the local timezone
fn local_to_utc(otime: chrono::NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&otime)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&otime))
}
