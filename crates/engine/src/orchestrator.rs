//! Sync orchestration
//!
//! One run walks `Resolving -> Planning -> Executing(i) -> Done | Aborted`.
//! Plan items run strictly in order; the first failing item aborts the run and
//! every later item is reported as skipped, since its parent may be missing
//! from the container.

use crate::prepare::Preparer;
use crate::resolver;
use crate::throttle::RateLimit;
use crate::transport::{UploadOutcome, UploadTransport};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::ObjectStore;
use sv_core::{
    enumerate, planner, Encryptor, PlannedTransfer, Result, SnapshotName, SnapshotSender, SnapshotSource,
    TransferKind,
};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Resolving,
    Planning,
    Executing(usize),
    Done,
    Aborted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Resolving => f.write_str("resolving"),
            SyncState::Planning => f.write_str("planning"),
            SyncState::Executing(index) => write!(f, "executing item {}", index),
            SyncState::Done => f.write_str("done"),
            SyncState::Aborted => f.write_str("aborted"),
        }
    }
}

/// Pipeline stage an item failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Prepare,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => f.write_str("prepare"),
            Stage::Upload => f.write_str("upload"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Uploaded { bytes: u64 },
    WouldUpload { bytes: u64 },
    Failed { stage: Stage, error: String },
    /// Not attempted because an earlier item failed
    Skipped,
}

impl From<UploadOutcome> for ItemOutcome {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::Uploaded { bytes } => ItemOutcome::Uploaded { bytes },
            UploadOutcome::WouldUpload { bytes } => ItemOutcome::WouldUpload { bytes },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub snapshot: String,
    pub parent: Option<String>,
    pub kind: TransferKind,
    pub name: SnapshotName,
    pub outcome: ItemOutcome,
}

impl ItemReport {
    fn new(transfer: &PlannedTransfer, outcome: ItemOutcome) -> Self {
        Self {
            snapshot: transfer.snapshot.to_string(),
            parent: transfer.parent.as_ref().map(|p| p.to_string()),
            kind: transfer.kind,
            name: transfer.name.clone(),
            outcome,
        }
    }
}

/// Result of one run, in plan order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub state: SyncState,
    pub dry_run: bool,
    pub items: Vec<ItemReport>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.state == SyncState::Done
            && !self
                .items
                .iter()
                .any(|item| matches!(item.outcome, ItemOutcome::Failed { .. }))
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// The item that aborted the run, if any
    pub fn failure(&self) -> Option<&ItemReport> {
        self.items
            .iter()
            .find(|item| matches!(item.outcome, ItemOutcome::Failed { .. }))
    }

    pub fn count(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| predicate(&item.outcome)).count()
    }
}

/// Run settings for [`SyncOrchestrator`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub container: String,
    pub work_dir: PathBuf,
    pub dry_run: bool,
    pub show_progress: bool,
    /// Cap on the staging copy speed
    pub rate_limit: Option<RateLimit>,
}

impl SyncOptions {
    pub fn new(container: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            container: container.into(),
            work_dir: work_dir.into(),
            dry_run: false,
            show_progress: false,
            rate_limit: None,
        }
    }
}

/// Drives one subvolume's snapshots into the container
pub struct SyncOrchestrator {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn ObjectStore>,
    preparer: Preparer,
    transport: UploadTransport,
    state: SyncState,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        sender: Arc<dyn SnapshotSender>,
        store: Arc<dyn ObjectStore>,
        options: SyncOptions,
    ) -> Self {
        let preparer = Preparer::new(sender, options.work_dir)
            .with_progress(options.show_progress)
            .with_rate_limit(options.rate_limit);
        let transport = UploadTransport::new(store.clone(), options.container).with_dry_run(options.dry_run);
        Self {
            source,
            store,
            preparer,
            transport,
            state: SyncState::Resolving,
        }
    }

    /// Encrypt artifacts for `recipient` before they are staged
    pub fn with_encryption(mut self, encryptor: Arc<dyn Encryptor>, recipient: impl Into<String>) -> Self {
        self.preparer = self.preparer.with_encryption(encryptor, recipient);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn transition(&mut self, next: SyncState) {
        debug!("Sync state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Archive every snapshot of `subvolume_path` missing from the container
    ///
    /// Errors are returned for failures before any item ran (unusable work
    /// directory, filesystem, listing or naming). Item failures are part of
    /// the report.
    pub async fn run(&mut self, subvolume_path: &Path) -> Result<SyncReport> {
        self.transition(SyncState::Resolving);
        let resolved = self.resolve(subvolume_path).await;
        let (locals, archived) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                self.transition(SyncState::Aborted);
                return Err(e);
            }
        };

        self.transition(SyncState::Planning);
        let plan = match planner::plan(&locals, &archived) {
            Ok(plan) => plan,
            Err(e) => {
                self.transition(SyncState::Aborted);
                return Err(e.into());
            }
        };
        debug_assert!(planner::chain_is_unbroken(&plan, &archived));

        if plan.is_empty() {
            info!("Nothing to upload, container is up to date");
            self.transition(SyncState::Done);
            return Ok(self.report(Vec::new()));
        }
        info!("{} snapshot(s) to upload", plan.len());

        let mut items = Vec::with_capacity(plan.len());
        let mut aborted = false;
        for (index, transfer) in plan.iter().enumerate() {
            if aborted {
                items.push(ItemReport::new(transfer, ItemOutcome::Skipped));
                continue;
            }

            self.transition(SyncState::Executing(index));
            let outcome = match self.execute(transfer).await {
                Ok(outcome) => outcome.into(),
                Err((stage, e)) => {
                    error!("Failed to {} {}: {}", stage, transfer.snapshot, e);
                    aborted = true;
                    ItemOutcome::Failed {
                        stage,
                        error: e.to_string(),
                    }
                }
            };
            items.push(ItemReport::new(transfer, outcome));
        }

        self.transition(if aborted { SyncState::Aborted } else { SyncState::Done });
        Ok(self.report(items))
    }

    async fn resolve(
        &self,
        subvolume_path: &Path,
    ) -> Result<(Vec<sv_core::LocalSnapshot>, std::collections::BTreeSet<SnapshotName>)> {
        self.preparer.check_work_dir().await?;

        let subvolume = self.source.subvolume(subvolume_path).await?;
        let prefix = SnapshotName::filesystem_prefix(subvolume.filesystem_uuid);
        tokio::try_join!(
            enumerate::snapshots_of(self.source.as_ref(), &subvolume),
            resolver::list_archived(self.store.as_ref(), self.transport.container(), Some(&prefix)),
        )
    }

    async fn execute(
        &self,
        transfer: &PlannedTransfer,
    ) -> std::result::Result<UploadOutcome, (Stage, sv_core::Error)> {
        let artifact = self
            .preparer
            .prepare(transfer)
            .await
            .map_err(|e| (Stage::Prepare, e))?;
        self.transport
            .upload(artifact)
            .await
            .map_err(|e| (Stage::Upload, e))
    }

    fn report(&self, items: Vec<ItemReport>) -> SyncReport {
        SyncReport {
            state: self.state,
            dry_run: self.transport.is_dry_run(),
            items,
        }
    }
}
