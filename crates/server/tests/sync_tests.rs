//! Lifecycle synchronizer and reconciliation sweep tests.

mod common;

use common::TestMetadata;
use common::fixtures::unique_email;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use upvault_core::{TokenIssuer, UploadId, UploadMetadata, UserId};
use upvault_engine::{
    EventReceivers, EventSenders, FilesystemStore, UploadEngine, UploadInfo, event_channels,
};
use upvault_metadata::models::UploadRow;
use upvault_metadata::{MetadataStore, UploadRepo, UserRepo};
use upvault_server::{ReconcileStats, Reconciler, Synchronizer};

fn upload(owner: Option<UserId>, filename: Option<&str>, size: u64) -> UploadInfo {
    let mut metadata = UploadMetadata::new();
    if let Some(name) = filename {
        metadata.insert("filename", name);
    }
    if let Some(owner) = owner {
        metadata.set_owner(owner);
    }
    UploadInfo::new(UploadId::generate(), size, metadata)
}

async fn wait_for<F>(store: &Arc<dyn MetadataStore>, upload_id: &str, ready: F) -> UploadRow
where
    F: Fn(&UploadRow) -> bool,
{
    for _ in 0..500 {
        if let Some(row) = store.get_upload(upload_id).await.unwrap()
            && ready(&row)
        {
            return row;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("ledger row for {upload_id} never became ready");
}

async fn new_user(store: &Arc<dyn MetadataStore>) -> UserId {
    let issuer = TokenIssuer::new(b"sync-test-secret", None).unwrap();
    let (user, _) = store
        .create_user(&unique_email("sync"), "hash", &issuer)
        .await
        .unwrap();
    user.id
}

// =============================================================================
// Synchronizer
// =============================================================================

#[tokio::test]
async fn test_created_then_completed() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let (senders, receivers) = event_channels(16);
    let sync = Synchronizer::new(store.clone()).spawn(receivers);

    let info = upload(Some(42), Some("movie.mkv"), 2048);
    senders.created.send(info.clone()).await.unwrap();

    let row = wait_for(&store, info.id.as_str(), |_| true).await;
    assert_eq!(row.owner, 42);
    assert_eq!(row.filename, "movie.mkv");
    assert_eq!(row.size, 2048);
    assert!(!row.completed);

    senders.completed.send(info.clone()).await.unwrap();
    let row = wait_for(&store, info.id.as_str(), |r| r.completed).await;
    assert!(row.completed_at.is_some());

    sync.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_events_do_not_stop_consumers() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let (senders, receivers) = event_channels(16);
    let sync = Synchronizer::new(store.clone()).spawn(receivers);

    // Completed for an upload the ledger never saw
    let stray = upload(Some(1), Some("stray.bin"), 1);
    senders.completed.send(stray.clone()).await.unwrap();
    // Created without a filename, and with an unusable owner
    senders.created.send(upload(Some(1), None, 1)).await.unwrap();
    let mut forged = upload(None, Some("forged.bin"), 1);
    forged.metadata.insert("user_id", "not-a-number");
    senders.created.send(forged.clone()).await.unwrap();

    // Both consumers keep going
    let good = upload(Some(1), Some("good.bin"), 1);
    senders.created.send(good.clone()).await.unwrap();
    wait_for(&store, good.id.as_str(), |_| true).await;
    senders.completed.send(good.clone()).await.unwrap();
    wait_for(&store, good.id.as_str(), |r| r.completed).await;

    assert!(store.get_upload(stray.id.as_str()).await.unwrap().is_none());
    assert!(store.get_upload(forged.id.as_str()).await.unwrap().is_none());
    assert!(!sync.is_finished());

    sync.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_created_event_keeps_first_row() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let sync = Synchronizer::new(store.clone());

    let info = upload(Some(5), Some("first.bin"), 10);
    sync.handle_created(&info).await.unwrap();

    let mut replay = info.clone();
    replay.metadata.set_owner(6);
    assert!(sync.handle_created(&replay).await.is_err());

    let row = store.get_upload(info.id.as_str()).await.unwrap().unwrap();
    assert_eq!(row.owner, 5);
}

#[tokio::test]
async fn test_repeated_completed_event_is_harmless() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let sync = Synchronizer::new(store.clone());

    let info = upload(Some(5), Some("twice.bin"), 10);
    sync.handle_created(&info).await.unwrap();
    sync.handle_completed(&info).await.unwrap();
    let first = store.get_upload(info.id.as_str()).await.unwrap().unwrap();

    sync.handle_completed(&info).await.unwrap();
    let second = store.get_upload(info.id.as_str()).await.unwrap().unwrap();
    assert_eq!(first.completed_at, second.completed_at);
}

#[tokio::test]
async fn test_shutdown_drains_buffered_events() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let (senders, receivers) = event_channels(64);

    let uploads: Vec<_> = (0..20)
        .map(|i| upload(Some(9), Some(&format!("f{i}.bin")), 1))
        .collect();
    for info in &uploads {
        senders.created.send(info.clone()).await.unwrap();
    }

    let sync = Synchronizer::new(store.clone()).spawn(receivers);
    sync.shutdown().await.unwrap();

    let rows = store.list_uploads_by_owner(9).await.unwrap();
    assert_eq!(rows.len(), uploads.len());

    // The engine side sees a closed channel afterwards
    assert!(senders.created.send(upload(Some(9), Some("late.bin"), 1)).await.is_err());
}

async fn engine_with(senders: EventSenders) -> (UploadEngine, TempDir) {
    let dir = TempDir::new().unwrap();
    let files = Arc::new(FilesystemStore::new(dir.path().join("files")).await.unwrap());
    (UploadEngine::new(files, senders), dir)
}

async fn queue_created_backlog(senders: &EventSenders, owner: UserId, count: usize) {
    for i in 0..count {
        let info = upload(Some(owner), Some(&format!("backlog-{i}.bin")), 1);
        senders.created.send(info).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_upload_completes_behind_created_backlog() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let (senders, receivers) = event_channels(256);
    let (engine, _dir) = engine_with(senders.clone()).await;

    queue_created_backlog(&senders, 7, 100).await;
    let empty = engine
        .create(0, upload(Some(7), Some("empty.bin"), 0).metadata)
        .await
        .unwrap();

    let sync = Synchronizer::new(store.clone()).spawn(receivers);
    let row = wait_for(&store, empty.id.as_str(), |r| r.completed).await;
    assert!(row.completed_at.is_some());

    sync.shutdown().await.unwrap();
    assert_eq!(store.list_uploads_by_owner(7).await.unwrap().len(), 101);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drain_keeps_created_before_completed() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let (senders, receivers) = event_channels(256);
    let (engine, _dir) = engine_with(senders.clone()).await;

    queue_created_backlog(&senders, 8, 100).await;
    let empty = engine
        .create(0, upload(Some(8), Some("empty.bin"), 0).metadata)
        .await
        .unwrap();

    let sync = Synchronizer::new(store.clone()).spawn(receivers);
    sync.shutdown().await.unwrap();

    let row = store.get_upload(empty.id.as_str()).await.unwrap().unwrap();
    assert!(row.completed);
}

#[tokio::test]
async fn test_completed_for_unknown_upload_does_not_wait_forever() {
    let metadata = TestMetadata::new().await.unwrap();
    let store = metadata.store();
    let (senders, receivers) = event_channels(16);
    let sync = Synchronizer::new(store.clone()).spawn(receivers);

    // Watermark 0: nothing to wait for, the event is reported untracked
    let stray = upload(Some(1), Some("stray.bin"), 1);
    senders.completed.send(stray.clone()).await.unwrap();

    let later = upload(Some(1), Some("later.bin"), 1);
    senders.created.send(later.clone()).await.unwrap();
    senders.completed.send(later.clone()).await.unwrap();
    wait_for(&store, later.id.as_str(), |r| r.completed).await;

    assert!(store.get_upload(stray.id.as_str()).await.unwrap().is_none());
    sync.shutdown().await.unwrap();
}

// =============================================================================
// Reconciler
// =============================================================================

struct Harness {
    metadata: TestMetadata,
    engine: Arc<UploadEngine>,
    _events: EventReceivers,
    _dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemStore::new(dir.path().join("files")).await.unwrap());
        let (senders, events): (EventSenders, EventReceivers) = event_channels(64);
        Self {
            metadata: TestMetadata::new().await.unwrap(),
            engine: Arc::new(UploadEngine::new(store, senders)),
            _events: events,
            _dir: dir,
        }
    }

    fn store(&self) -> Arc<dyn MetadataStore> {
        self.metadata.store()
    }

    fn reconciler(&self, grace: time::Duration) -> Reconciler {
        Reconciler::new(self.store(), self.engine.clone(), grace)
    }

    async fn create(&self, owner: Option<UserId>, filename: Option<&str>, size: u64) -> UploadInfo {
        let template = upload(owner, filename, size);
        self.engine.create(size, template.metadata).await.unwrap()
    }
}

#[tokio::test]
async fn test_reconcile_adopts_untracked_uploads() {
    let h = Harness::new().await;
    let owner = new_user(&h.store()).await;

    let pending = h.create(Some(owner), Some("pending.bin"), 10).await;
    let complete = h.create(Some(owner), Some("empty.bin"), 0).await;

    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats.adopted, 2);

    let row = h.store().get_upload(pending.id.as_str()).await.unwrap().unwrap();
    assert_eq!(row.owner, owner);
    assert_eq!(row.filename, "pending.bin");
    assert!(!row.completed);
    let row = h.store().get_upload(complete.id.as_str()).await.unwrap().unwrap();
    assert!(row.completed);

    // A second sweep has nothing to do
    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats, ReconcileStats::default());
}

#[tokio::test]
async fn test_reconcile_skips_unadoptable_uploads() {
    let h = Harness::new().await;

    let anonymous = h.create(None, Some("anon.bin"), 1).await;
    let owner = new_user(&h.store()).await;
    let unnamed = h.create(Some(owner), None, 1).await;
    let orphaned = h.create(Some(owner + 1000), Some("ghost.bin"), 1).await;

    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats.adopted, 0);
    assert_eq!(stats.skipped, 3);

    for info in [anonymous, unnamed, orphaned] {
        assert!(h.store().get_upload(info.id.as_str()).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_reconcile_marks_lost_completions() {
    let h = Harness::new().await;
    let owner = new_user(&h.store()).await;

    let info = h.create(Some(owner), Some("done.bin"), 0).await;
    h.store()
        .create_upload(info.id.as_str(), owner, "done.bin", 0)
        .await
        .unwrap();

    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert!(
        h.store()
            .get_upload(info.id.as_str())
            .await
            .unwrap()
            .unwrap()
            .completed
    );
}

#[tokio::test]
async fn test_reconcile_prunes_rows_without_upload() {
    let h = Harness::new().await;
    let gone = UploadId::generate();
    h.store()
        .create_upload(gone.as_str(), 3, "gone.bin", 5)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats.pruned, 1);
    assert!(h.store().get_upload(gone.as_str()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconcile_respects_grace_period() {
    let h = Harness::new().await;
    let owner = new_user(&h.store()).await;

    let untracked = h.create(Some(owner), Some("fresh.bin"), 1).await;
    let gone = UploadId::generate();
    h.store()
        .create_upload(gone.as_str(), owner, "gone.bin", 5)
        .await
        .unwrap();

    let stats = h.reconciler(time::Duration::hours(1)).run_once().await.unwrap();
    assert!(stats.is_empty());
    assert!(h.store().get_upload(untracked.id.as_str()).await.unwrap().is_none());
    assert!(h.store().get_upload(gone.as_str()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_reconcile_leaves_locked_uploads_alone() {
    let h = Harness::new().await;
    let id = UploadId::generate();
    h.store()
        .create_upload(id.as_str(), 3, "deleting.bin", 5)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A delete holding the upload between its engine and ledger steps
    let lock = h.engine.lock(&id).await;
    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats.pruned, 0);
    assert!(h.store().get_upload(id.as_str()).await.unwrap().is_some());

    drop(lock);
    let stats = h.reconciler(time::Duration::ZERO).run_once().await.unwrap();
    assert_eq!(stats.pruned, 1);
    assert!(h.store().get_upload(id.as_str()).await.unwrap().is_none());
}
