//! Preparation pipeline
//!
//! `send` stream, optionally piped through the encryptor, written to
//! `<work_dir>/<name>.partial` and renamed to `<work_dir>/<name>` once every
//! producer in the chain exited cleanly. When encryption is enabled the
//! plaintext only ever exists inside the pipe.

use crate::artifact::{PartialFile, StagedArtifact};
use crate::throttle::{RateLimit, Throttled};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sv_core::{ByteStream, Encryptor, Error, PlannedTransfer, Result, SnapshotSender};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Longest file name most filesystems accept
const NAME_MAX: usize = 255;
const PARTIAL_SUFFIX: &str = ".partial";

struct Encryption {
    encryptor: Arc<dyn Encryptor>,
    recipient: String,
}

/// Turns planned transfers into staged artifacts
pub struct Preparer {
    sender: Arc<dyn SnapshotSender>,
    encryption: Option<Encryption>,
    work_dir: PathBuf,
    show_progress: bool,
    rate_limit: Option<RateLimit>,
}

impl Preparer {
    pub fn new(sender: Arc<dyn SnapshotSender>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            sender,
            encryption: None,
            work_dir: work_dir.into(),
            show_progress: false,
            rate_limit: None,
        }
    }

    /// Encrypt every artifact for `recipient`
    pub fn with_encryption(mut self, encryptor: Arc<dyn Encryptor>, recipient: impl Into<String>) -> Self {
        self.encryption = Some(Encryption {
            encryptor,
            recipient: recipient.into(),
        });
        self
    }

    /// Draw a byte counter on stderr while staging
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Cap the staging copy at `limit`
    pub fn with_rate_limit(mut self, limit: Option<RateLimit>) -> Self {
        self.rate_limit = limit;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Fail unless the work directory exists and is a directory
    pub async fn check_work_dir(&self) -> Result<()> {
        match tokio::fs::metadata(&self.work_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::EnvironmentPrecondition(format!(
                "work directory {} is not a directory",
                self.work_dir.display()
            ))),
            Err(e) => Err(Error::EnvironmentPrecondition(format!(
                "work directory {} is not usable: {}",
                self.work_dir.display(),
                e
            ))),
        }
    }

    /// Produce the artifact for `transfer`
    #[instrument(skip_all, fields(name = %transfer.name, kind = %transfer.kind))]
    pub async fn prepare(&self, transfer: &PlannedTransfer) -> Result<StagedArtifact> {
        let file_name = staging_file_name(transfer.name.as_str());
        let target = self.work_dir.join(&file_name);
        let partial = self.work_dir.join(format!("{}{}", file_name, PARTIAL_SUFFIX));
        remove_leftover(&target).await?;
        remove_leftover(&partial).await?;

        info!("Preparing {}", transfer);
        let stream = self
            .sender
            .send(&transfer.snapshot, transfer.parent.as_ref())
            .await?;
        let stream = match &self.encryption {
            Some(encryption) => encryption
                .encryptor
                .encrypt(stream, &encryption.recipient)
                .await
                .map_err(|e| as_preparation(transfer, e))?,
            None => stream,
        };

        let (guard, file) = PartialFile::create(partial)
            .await
            .map_err(|e| Error::filesystem_access(&self.work_dir, e))?;
        let written = self
            .stage(stream, file, transfer)
            .await
            .map_err(|e| as_preparation(transfer, e))?;

        guard
            .persist(&target)
            .await
            .map_err(|e| Error::filesystem_access(&target, e))?;
        info!("Staged {} bytes for {}", written, transfer.snapshot);

        Ok(StagedArtifact::new(target, transfer.name.clone(), written))
    }

    async fn stage(
        &self,
        stream: ByteStream,
        file: tokio::fs::File,
        transfer: &PlannedTransfer,
    ) -> Result<u64> {
        let file = Throttled::new(file, self.rate_limit);
        if !self.show_progress {
            let mut file = file;
            let written = stream.copy_into(&mut file).await?;
            file.flush().await?;
            return Ok(written);
        }

        let bar = ProgressBar::new_spinner().with_message(transfer.snapshot.to_string());
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}: {bytes} ({binary_bytes_per_sec}) {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(200));

        let mut writer = bar.wrap_async_write(file);
        let result = stream.copy_into(&mut writer).await;
        let flushed = writer.flush().await;
        bar.finish_and_clear();

        let written = result?;
        flushed?;
        Ok(written)
    }
}

/// Local file name for a remote object name
///
/// Encoding grows every `/` to four bytes, so deep snapshot paths can outgrow
/// the filesystem's name limit. Those are cut short and made unique again by
/// a digest of the full name, which keeps the result stable across runs.
fn staging_file_name(name: &str) -> String {
    let limit = NAME_MAX - PARTIAL_SUFFIX.len();
    if name.len() <= limit {
        return name.to_string();
    }

    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple().to_string();
    let mut cut = limit - digest.len() - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}~{}", &name[..cut], digest)
}

/// Remove an artifact left behind by an interrupted run
async fn remove_leftover(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            warn!("Removed leftover {} from a previous run", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::filesystem_access(path, e)),
    }
}

fn as_preparation(transfer: &PlannedTransfer, error: Error) -> Error {
    match error {
        Error::Preparation { .. } => error,
        other => Error::preparation(&transfer.snapshot, other),
    }
}
