//! Lifecycle synchronizer: mirrors engine events into the upload ledger.
//!
//! One consumer task per event channel. Each consumer handles its events one
//! at a time in delivery order, and failures are logged and counted rather
//! than propagated, so a bad event never stops the loop.
//!
//! The completed consumer holds each event until the created consumer has
//! applied every created event published before it, so an upload's row
//! exists before it is marked complete.

use crate::metrics::{SYNC_CONSUMERS_PANICKED, record_sync_event};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use upvault_engine::{EventReceiver, EventReceivers, UploadEvent, UploadEventKind, UploadInfo};
use upvault_metadata::models::UploadRow;
use upvault_metadata::{MetadataError, MetadataStore, UploadRepo};

/// Why an event did not change the ledger.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A *completed* event for an upload the ledger never recorded.
    #[error("upload {0} is not tracked")]
    UntrackedUpload(String),

    #[error("upload {0} has no filename")]
    MissingFilename(String),

    #[error("upload {upload_id} has no usable owner: {reason}")]
    InvalidOwner { upload_id: String, reason: String },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl SyncError {
    /// Metric label for the outcome.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::UntrackedUpload(_) => "untracked",
            Self::MissingFilename(_) | Self::InvalidOwner { .. } => "dropped",
            Self::Metadata(MetadataError::AlreadyExists(_)) => "duplicate",
            Self::Metadata(_) => "error",
        }
    }
}

/// Applies lifecycle events to the ledger.
pub struct Synchronizer {
    metadata: Arc<dyn MetadataStore>,
}

impl Synchronizer {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Record a freshly created upload as pending.
    pub async fn handle_created(&self, upload: &UploadInfo) -> Result<UploadRow, SyncError> {
        let upload_id = upload.id.as_str();
        let filename = upload
            .metadata
            .filename()
            .ok_or_else(|| SyncError::MissingFilename(upload_id.to_string()))?;
        let owner = match upload.metadata.owner() {
            Some(Ok(owner)) => owner,
            Some(Err(e)) => {
                return Err(SyncError::InvalidOwner {
                    upload_id: upload_id.to_string(),
                    reason: e.to_string(),
                });
            }
            None => {
                return Err(SyncError::InvalidOwner {
                    upload_id: upload_id.to_string(),
                    reason: "owner missing".to_string(),
                });
            }
        };
        let size = i64::try_from(upload.size).map_err(|_| {
            MetadataError::Constraint(format!("upload size {} out of range", upload.size))
        })?;

        let row = self
            .metadata
            .create_upload(upload_id, owner, filename, size)
            .await?;
        debug!(upload_id, owner, filename, size, "upload recorded");
        Ok(row)
    }

    /// Flip a recorded upload to completed.
    pub async fn handle_completed(&self, upload: &UploadInfo) -> Result<(), SyncError> {
        let upload_id = upload.id.as_str();
        match self.metadata.mark_completed(upload_id).await {
            Ok(()) => {
                debug!(upload_id, "upload marked completed");
                Ok(())
            }
            Err(MetadataError::NotFound(_)) => Err(SyncError::UntrackedUpload(upload_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Handle one event, logging and counting the outcome.
    pub async fn process(&self, event: &UploadEvent) {
        let result = match event.kind {
            UploadEventKind::Created => self.handle_created(&event.upload).await.map(|_| ()),
            UploadEventKind::Completed => self.handle_completed(&event.upload).await,
        };

        let outcome = match result {
            Ok(()) => "recorded",
            Err(e) => {
                let upload_id = event.upload.id.as_str();
                match &e {
                    SyncError::Metadata(MetadataError::AlreadyExists(_)) => {
                        error!(upload_id, kind = %event.kind, "upload id already recorded");
                    }
                    SyncError::Metadata(err) => {
                        error!(upload_id, kind = %event.kind, error = %err, "failed to update ledger");
                    }
                    other => {
                        warn!(upload_id, kind = %event.kind, error = %other, "ignoring lifecycle event");
                    }
                }
                e.outcome()
            }
        };
        record_sync_event(event.kind.as_str(), outcome);
    }

    /// Start one consumer per channel.
    pub fn spawn(self, receivers: EventReceivers) -> SyncHandle {
        let this = Arc::new(self);
        let (shutdown, signal) = watch::channel(false);
        let (applied, applied_rx) = watch::channel(0u64);

        let created = tokio::spawn(this.clone().consume(
            receivers.created,
            signal.clone(),
            Progress::Report(applied),
        ));
        let completed = tokio::spawn(this.consume(
            receivers.completed,
            signal,
            Progress::Await(applied_rx),
        ));
        info!("lifecycle synchronizer started");

        SyncHandle {
            shutdown,
            created,
            completed,
        }
    }

    async fn consume(
        self: Arc<Self>,
        mut events: EventReceiver,
        mut shutdown: watch::Receiver<bool>,
        mut progress: Progress,
    ) {
        let kind = events.kind();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.apply(&event, &mut progress).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    events.close();
                    let mut drained = 0usize;
                    while let Some(event) = events.recv().await {
                        self.apply(&event, &mut progress).await;
                        drained += 1;
                    }
                    debug!(kind = %kind, drained, "drained buffered events");
                    break;
                }
            }
        }
        info!(kind = %kind, "lifecycle consumer stopped");
    }

    async fn apply(&self, event: &UploadEvent, progress: &mut Progress) {
        match progress {
            Progress::Report(applied) => {
                self.process(event).await;
                applied.send_modify(|n| *n += 1);
            }
            Progress::Await(applied) => {
                let needed = event.created_watermark;
                if *applied.borrow() < needed {
                    debug!(upload_id = %event.upload.id, needed, "waiting for created events");
                }
                // Err: the created consumer is gone, nothing more will be applied
                let _ = applied.wait_for(|n| *n >= needed).await;
                self.process(event).await;
            }
        }
    }
}

/// A consumer's side of the created-before-completed ordering.
enum Progress {
    /// Counts created events as they are applied.
    Report(watch::Sender<u64>),
    /// Waits for the created count to reach each event's watermark.
    Await(watch::Receiver<u64>),
}

/// Handle to the running consumers. Dropping it stops them like
/// [`SyncHandle::shutdown`] without waiting.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    created: JoinHandle<()>,
    completed: JoinHandle<()>,
}

impl SyncHandle {
    /// Whether both consumers have exited.
    pub fn is_finished(&self) -> bool {
        self.created.is_finished() && self.completed.is_finished()
    }

    /// Stop both consumers after they drain already-buffered events.
    ///
    /// Returns the first consumer failure, if any; panics are logged and
    /// counted either way.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.shutdown.send_replace(true);

        let created = report(UploadEventKind::Created, self.created.await);
        let completed = report(UploadEventKind::Completed, self.completed.await);
        created.and(completed)
    }
}

fn report(kind: UploadEventKind, result: Result<(), JoinError>) -> Result<(), JoinError> {
    if let Err(e) = &result {
        if e.is_panic() {
            SYNC_CONSUMERS_PANICKED.inc();
            error!(kind = %kind, panic = ?e, "lifecycle consumer panicked");
        } else {
            warn!(kind = %kind, error = %e, "lifecycle consumer was cancelled");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use upvault_core::{UploadId, UploadMetadata};
    use upvault_metadata::SqliteStore;

    async fn synchronizer() -> (Synchronizer, Arc<dyn MetadataStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(dir.path().join("metadata.db")).await.unwrap());
        (Synchronizer::new(metadata.clone()), metadata, dir)
    }

    fn upload(owner: Option<&str>, filename: Option<&str>) -> UploadInfo {
        let mut metadata = UploadMetadata::new();
        if let Some(owner) = owner {
            metadata.insert("user_id", owner);
        }
        if let Some(filename) = filename {
            metadata.insert("filename", filename);
        }
        UploadInfo::new(UploadId::generate(), 10, metadata)
    }

    #[tokio::test]
    async fn created_records_pending_row() {
        let (sync, metadata, _dir) = synchronizer().await;
        let info = upload(Some("5"), Some("a.txt"));

        let row = sync.handle_created(&info).await.unwrap();
        assert_eq!(row.owner, 5);
        assert_eq!(row.filename, "a.txt");
        assert_eq!(row.size, 10);
        assert!(!row.completed);
        assert!(metadata.get_upload(info.id.as_str()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn created_without_filename_is_dropped() {
        let (sync, metadata, _dir) = synchronizer().await;
        let info = upload(Some("5"), None);

        let err = sync.handle_created(&info).await.unwrap_err();
        assert!(matches!(err, SyncError::MissingFilename(_)));
        assert_eq!(err.outcome(), "dropped");
        assert!(metadata.get_upload(info.id.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn created_with_non_numeric_owner_is_dropped() {
        let (sync, metadata, _dir) = synchronizer().await;
        let info = upload(Some("alice"), Some("a.txt"));

        assert!(matches!(
            sync.handle_created(&info).await,
            Err(SyncError::InvalidOwner { .. })
        ));
        assert!(metadata.get_upload(info.id.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_created_is_reported() {
        let (sync, _metadata, _dir) = synchronizer().await;
        let info = upload(Some("5"), Some("a.txt"));

        sync.handle_created(&info).await.unwrap();
        let err = sync.handle_created(&info).await.unwrap_err();
        assert_eq!(err.outcome(), "duplicate");
    }

    #[tokio::test]
    async fn completed_without_created_is_untracked() {
        let (sync, _metadata, _dir) = synchronizer().await;
        let info = upload(Some("5"), Some("a.txt"));

        assert!(matches!(
            sync.handle_completed(&info).await,
            Err(SyncError::UntrackedUpload(id)) if id == info.id.as_str()
        ));
    }

    #[tokio::test]
    async fn process_swallows_failures() {
        let (sync, _metadata, _dir) = synchronizer().await;
        let event = UploadEvent {
            kind: UploadEventKind::Completed,
            upload: upload(Some("5"), Some("a.txt")),
            created_watermark: 0,
        };
        sync.process(&event).await;
    }
}
