//! End-to-end sync runs against in-process fakes

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use engine::{ItemOutcome, Stage, SyncOptions, SyncOrchestrator, SyncState};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::MemoryStore;
use sv_core::{
    naming, ByteStream, Encryptor, Error, LocalSnapshot, Result, SnapshotSender, SnapshotSource, Subvolume,
    TransferKind,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const CONTAINER: &str = "backups";

fn fs_uuid() -> Uuid {
    Uuid::parse_str("6d4f3c1e-9a0b-4b5c-8d7e-0f1a2b3c4d5e").unwrap()
}

fn subvolume() -> Subvolume {
    Subvolume {
        path: PathBuf::from("/fs/home"),
        mount_root: PathBuf::from("/fs"),
        relative_path: "home".to_string(),
        uuid: Uuid::parse_str("8a3c6f0e-1b2d-4e5f-9a8b-7c6d5e4f3a2b").unwrap(),
        filesystem_uuid: fs_uuid(),
    }
}

fn snap(n: i64) -> LocalSnapshot {
    let relative_path = format!("snapshots/home.{}", n);
    LocalSnapshot {
        filesystem_uuid: fs_uuid(),
        absolute_path: PathBuf::from("/fs").join(&relative_path),
        relative_path,
        created_at: Utc.timestamp_opt(1_700_000_000 + n * 86_400, 0).unwrap(),
    }
}

/// Snapshot source whose snapshot list can change between runs
struct FakeSource {
    snapshots: Mutex<Vec<LocalSnapshot>>,
}

impl FakeSource {
    fn with(snapshots: Vec<LocalSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots),
        })
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn subvolume(&self, path: &Path) -> Result<Subvolume> {
        if path != Path::new("/fs/home") {
            return Err(Error::filesystem_access(path, "not a btrfs subvolume"));
        }
        Ok(subvolume())
    }

    async fn list_read_only_snapshots(&self, _subvolume: &Subvolume) -> Result<Vec<LocalSnapshot>> {
        // Reverse to make sure ordering is the enumerator's job
        let mut snapshots = self.snapshots.lock().clone();
        snapshots.reverse();
        Ok(snapshots)
    }
}

/// Sender producing a readable description of each stream
#[derive(Default)]
struct FakeSender {
    sent: Mutex<Vec<(String, Option<String>)>>,
    failing: Mutex<Vec<String>>,
}

#[async_trait]
impl SnapshotSender for FakeSender {
    async fn send(&self, snapshot: &LocalSnapshot, parent: Option<&LocalSnapshot>) -> Result<ByteStream> {
        self.sent.lock().push((
            snapshot.relative_path.clone(),
            parent.map(|p| p.relative_path.clone()),
        ));

        let body = match parent {
            Some(parent) => format!("delta {} -> {}", parent.relative_path, snapshot.relative_path),
            None => format!("full {}", snapshot.relative_path),
        };
        if self.failing.lock().contains(&snapshot.relative_path) {
            let label = snapshot.to_string();
            return Ok(ByteStream::new(std::io::Cursor::new(body.into_bytes()), async move {
                Err(Error::preparation(label, "ERROR: send ioctl failed"))
            }));
        }
        Ok(ByteStream::from_bytes(body.into_bytes()))
    }
}

/// Sender whose stream delivers one chunk and then never ends
struct StallingSender;

#[async_trait]
impl SnapshotSender for StallingSender {
    async fn send(&self, _snapshot: &LocalSnapshot, _parent: Option<&LocalSnapshot>) -> Result<ByteStream> {
        let (reader, mut writer) = tokio::io::duplex(1024);
        writer.write_all(b"first chunk").await?;
        Ok(ByteStream::new(reader, async move {
            // Holding the write end keeps the stream open
            let _writer = writer;
            std::future::pending::<()>().await;
            Ok(())
        }))
    }
}

/// Reverses the stream and tags it with the recipient
struct FakeEncryptor;

#[async_trait]
impl Encryptor for FakeEncryptor {
    async fn encrypt(&self, input: ByteStream, recipient: &str) -> Result<ByteStream> {
        let mut plain = Vec::new();
        input.copy_into(&mut plain).await?;
        plain.reverse();
        let mut out = format!("age[{}]:", recipient).into_bytes();
        out.extend(plain);
        Ok(ByteStream::from_bytes(out))
    }
}

struct Harness {
    source: Arc<FakeSource>,
    sender: Arc<FakeSender>,
    store: Arc<MemoryStore>,
    work_dir: TempDir,
}

impl Harness {
    fn new(snapshots: Vec<LocalSnapshot>) -> Self {
        Self {
            source: FakeSource::with(snapshots),
            sender: Arc::new(FakeSender::default()),
            store: Arc::new(MemoryStore::new().with_container(CONTAINER)),
            work_dir: TempDir::new().unwrap(),
        }
    }

    fn orchestrator(&self, dry_run: bool) -> SyncOrchestrator {
        let mut options = SyncOptions::new(CONTAINER, self.work_dir.path());
        options.dry_run = dry_run;
        SyncOrchestrator::new(self.source.clone(), self.sender.clone(), self.store.clone(), options)
    }

    fn archive(&self, snapshot: &LocalSnapshot) {
        self.store
            .insert(CONTAINER, snapshot.name().unwrap().as_str(), "already there");
    }

    fn stored(&self, snapshot: &LocalSnapshot) -> Option<String> {
        self.store
            .get(CONTAINER, snapshot.name().unwrap().as_str())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work_dir.path()).unwrap().next().is_none()
    }
}

fn shape(report: &engine::SyncReport) -> Vec<(String, Option<String>, TransferKind)> {
    report
        .items
        .iter()
        .map(|item| (item.snapshot.clone(), item.parent.clone(), item.kind))
        .collect()
}

fn tree(n: i64) -> String {
    format!("<FS_TREE>/snapshots/home.{}", n)
}

#[tokio::test]
async fn test_first_run_uploads_whole_chain() {
    let h = Harness::new(vec![snap(1), snap(2), snap(3)]);
    let mut orchestrator = h.orchestrator(false);

    let report = orchestrator.run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(report.state, SyncState::Done);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        shape(&report),
        vec![
            (tree(1), None, TransferKind::Full),
            (tree(2), Some(tree(1)), TransferKind::Incremental),
            (tree(3), Some(tree(2)), TransferKind::Incremental),
        ]
    );
    assert_eq!(h.stored(&snap(1)).unwrap(), "full snapshots/home.1");
    assert_eq!(
        h.stored(&snap(3)).unwrap(),
        "delta snapshots/home.2 -> snapshots/home.3"
    );
    assert_eq!(h.store.put_calls(), 3);
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let h = Harness::new(vec![snap(1), snap(2)]);
    h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();
    let names_before = h.store.names(CONTAINER);

    let mut again = h.orchestrator(false);
    let report = again.run(Path::new("/fs/home")).await.unwrap();

    assert!(report.items.is_empty());
    assert_eq!(again.state(), SyncState::Done);
    assert_eq!(h.store.put_calls(), 2);
    assert_eq!(h.store.names(CONTAINER), names_before);
}

#[tokio::test]
async fn test_resumes_after_archived_snapshot() {
    let h = Harness::new(vec![snap(1), snap(2)]);
    h.archive(&snap(1));

    let report = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(
        shape(&report),
        vec![(tree(2), Some(tree(1)), TransferKind::Incremental)]
    );
    assert_eq!(h.stored(&snap(1)).unwrap(), "already there");
}

#[tokio::test]
async fn test_oldest_local_sent_whole() {
    // snapshot 1 was deleted locally and never archived
    let h = Harness::new(vec![snap(2)]);

    let report = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(shape(&report), vec![(tree(2), None, TransferKind::Full)]);
}

#[tokio::test]
async fn test_new_snapshot_chains_onto_archive() {
    let h = Harness::new(vec![snap(1), snap(2)]);
    h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();

    h.source.snapshots.lock().push(snap(3));
    let report = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(
        shape(&report),
        vec![(tree(3), Some(tree(2)), TransferKind::Incremental)]
    );
}

#[tokio::test]
async fn test_dry_run_prepares_but_never_uploads() {
    let h = Harness::new(vec![snap(1), snap(2)]);
    h.archive(&snap(1));
    let names_before = h.store.names(CONTAINER);

    let report = h.orchestrator(true).run(Path::new("/fs/home")).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.exit_code(), 0);
    assert!(matches!(report.items[0].outcome, ItemOutcome::WouldUpload { bytes } if bytes > 0));
    assert_eq!(h.store.put_calls(), 0);
    assert_eq!(h.store.names(CONTAINER), names_before);
    assert_eq!(h.sender.sent.lock().len(), 1);
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_prepare_failure_aborts_and_skips() {
    let h = Harness::new(vec![snap(1), snap(2), snap(3)]);
    h.sender.failing.lock().push("snapshots/home.2".to_string());

    let mut orchestrator = h.orchestrator(false);
    let report = orchestrator.run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(report.state, SyncState::Aborted);
    assert_eq!(orchestrator.state(), SyncState::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.items[0].outcome, ItemOutcome::Uploaded { .. }));
    match &report.items[1].outcome {
        ItemOutcome::Failed { stage, error } => {
            assert_eq!(*stage, Stage::Prepare);
            assert!(error.contains("send ioctl failed"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.items[2].outcome, ItemOutcome::Skipped);

    // Nothing after the failure was sent, staged or uploaded
    assert_eq!(h.sender.sent.lock().len(), 2);
    assert_eq!(h.store.put_calls(), 1);
    assert!(h.stored(&snap(2)).is_none());
    assert!(h.work_dir_is_empty());

    // Once the problem is gone the chain continues where it stopped
    h.sender.failing.lock().clear();
    let report = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();
    assert_eq!(
        shape(&report),
        vec![
            (tree(2), Some(tree(1)), TransferKind::Incremental),
            (tree(3), Some(tree(2)), TransferKind::Incremental),
        ]
    );
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_upload_failure_aborts() {
    let h = Harness::new(vec![snap(1), snap(2)]);
    h.store.fail_uploads_of(snap(1).name().unwrap().as_str());

    let report = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(report.state, SyncState::Aborted);
    assert!(matches!(
        report.items[0].outcome,
        ItemOutcome::Failed { stage: Stage::Upload, .. }
    ));
    assert_eq!(report.items[1].outcome, ItemOutcome::Skipped);
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_encrypted_artifacts() {
    let h = Harness::new(vec![snap(1)]);
    let mut orchestrator = h
        .orchestrator(false)
        .with_encryption(Arc::new(FakeEncryptor), "age1recipient");

    orchestrator.run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(
        h.stored(&snap(1)).unwrap(),
        "age[age1recipient]:1.emoh/stohspans lluf"
    );
}

#[tokio::test]
async fn test_missing_container_is_fatal() {
    let h = Harness::new(vec![snap(1)]);
    let store = Arc::new(MemoryStore::new());
    let mut orchestrator = SyncOrchestrator::new(
        h.source.clone(),
        h.sender.clone(),
        store.clone(),
        SyncOptions::new(CONTAINER, h.work_dir.path()),
    );

    let err = orchestrator.run(Path::new("/fs/home")).await.unwrap_err();

    assert!(matches!(err, Error::RemoteUnavailable(_)));
    assert_eq!(orchestrator.state(), SyncState::Aborted);
    assert!(h.sender.sent.lock().is_empty());
    assert_eq!(store.put_calls(), 0);
}

#[tokio::test]
async fn test_unusable_inputs_fail_before_any_transfer() {
    let h = Harness::new(vec![snap(1)]);

    let err = h
        .orchestrator(false)
        .run(Path::new("/not/btrfs"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FilesystemAccess { .. }));

    let mut options = SyncOptions::new(CONTAINER, h.work_dir.path().join("missing"));
    options.dry_run = true;
    let err = SyncOrchestrator::new(h.source.clone(), h.sender.clone(), h.store.clone(), options)
        .run(Path::new("/fs/home"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EnvironmentPrecondition(_)));
    assert!(h.sender.sent.lock().is_empty());
}

#[tokio::test]
async fn test_invalid_snapshot_path_rejects_run() {
    let mut bad = snap(2);
    bad.relative_path = format!("snapshots/home{}2", sv_core::SEPARATOR_ESCAPE);
    let h = Harness::new(vec![snap(1), bad]);

    let err = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap_err();

    assert!(matches!(err, Error::InvalidName(_)));
    assert_eq!(h.store.put_calls(), 0);
}

#[tokio::test]
async fn test_other_filesystems_ignored() {
    let h = Harness::new(vec![snap(1)]);
    let other = naming::encode(Uuid::new_v4(), "snapshots/home.1").unwrap();
    h.store.insert(CONTAINER, other.as_str(), "someone else");
    h.store.insert(CONTAINER, "notes.txt", "not a snapshot");

    let report = h.orchestrator(false).run(Path::new("/fs/home")).await.unwrap();

    assert_eq!(shape(&report), vec![(tree(1), None, TransferKind::Full)]);
    let names: BTreeSet<String> = h.store.names(CONTAINER).into_iter().collect();
    assert_eq!(names.len(), 3);
}

#[tokio::test]
async fn test_interrupted_run_leaves_no_files() {
    let h = Harness::new(vec![snap(1), snap(2)]);
    let mut orchestrator = SyncOrchestrator::new(
        h.source.clone(),
        Arc::new(StallingSender),
        h.store.clone(),
        SyncOptions::new(CONTAINER, h.work_dir.path()),
    );

    let work_dir = h.work_dir.path().to_path_buf();
    let staging_started = async {
        loop {
            let partial_written = std::fs::read_dir(&work_dir).unwrap().flatten().any(|entry| {
                entry.file_name().to_string_lossy().ends_with(".partial")
                    && entry.metadata().map(|meta| meta.len() > 0).unwrap_or(false)
            });
            if partial_written {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    // Dropping the run future is what Ctrl-C does to it
    tokio::select! {
        _ = orchestrator.run(Path::new("/fs/home")) => panic!("stalled run finished"),
        started = tokio::time::timeout(Duration::from_secs(10), staging_started) => {
            started.expect("staging never started");
        }
    }

    assert!(h.work_dir_is_empty());
    assert_eq!(h.store.put_calls(), 0);
    assert!(h.store.names(CONTAINER).is_empty());
}
