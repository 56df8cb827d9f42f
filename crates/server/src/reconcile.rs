//! Periodic reconciliation between the engine and the upload ledger.
//!
//! Lifecycle events can be lost: the process may stop with events still
//! queued, or a ledger write may fail. The sweep repairs both directions.
//! Engine uploads with a usable owner and filename but no ledger row are
//! adopted. Ledger rows whose engine object is gone are pruned, unless the
//! upload's engine lock is held. Anything younger than the grace period is
//! left to the synchronizer.

use crate::metrics::{RECONCILE_ACTIONS, RECONCILE_DURATION};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use upvault_core::UploadId;
use upvault_engine::{EngineError, UploadEngine, UploadInfo};
use upvault_metadata::{MetadataError, MetadataStore, UploadRepo, UserRepo};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Engine uploads recorded in the ledger.
    pub adopted: u64,
    /// Ledger rows marked completed after a lost *completed* event.
    pub completed: u64,
    /// Ledger rows removed because the engine object is gone.
    pub pruned: u64,
    /// Engine uploads that could not be adopted.
    pub skipped: u64,
}

impl ReconcileStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Reconciler {
    metadata: Arc<dyn MetadataStore>,
    engine: Arc<UploadEngine>,
    grace: time::Duration,
}

impl Reconciler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        engine: Arc<UploadEngine>,
        grace: time::Duration,
    ) -> Self {
        Self {
            metadata,
            engine,
            grace,
        }
    }

    /// Run one sweep.
    pub async fn run_once(&self) -> Result<ReconcileStats, ReconcileError> {
        let timer = RECONCILE_DURATION.start_timer();
        let cutoff = OffsetDateTime::now_utc() - self.grace;
        let mut stats = ReconcileStats::default();

        self.adopt_orphans(cutoff, &mut stats).await?;
        self.prune_missing(cutoff, &mut stats).await?;

        timer.observe_duration();
        Ok(stats)
    }

    /// Run a sweep immediately and then every `interval` until aborted.
    pub fn spawn(self, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(stats) if stats.is_empty() => debug!("reconciliation found nothing to repair"),
                    Ok(stats) => info!(
                        adopted = stats.adopted,
                        completed = stats.completed,
                        pruned = stats.pruned,
                        skipped = stats.skipped,
                        "reconciliation repaired the ledger"
                    ),
                    Err(e) => warn!(error = %e, "reconciliation sweep failed"),
                }
            }
        })
    }

    async fn adopt_orphans(
        &self,
        cutoff: OffsetDateTime,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        for upload in self.engine.list().await? {
            if upload.created_at > cutoff {
                continue;
            }

            match self.metadata.get_upload(upload.id.as_str()).await? {
                Some(row) if !row.completed && upload.is_complete() => {
                    self.metadata.mark_completed(&row.file_id).await?;
                    stats.completed += 1;
                    RECONCILE_ACTIONS.with_label_values(&["completed"]).inc();
                    info!(upload_id = %upload.id, "marked completed upload in ledger");
                }
                Some(_) => {}
                None => self.adopt(&upload, stats).await?,
            }
        }
        Ok(())
    }

    async fn adopt(
        &self,
        upload: &UploadInfo,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        let (owner, filename) = match (upload.metadata.owner(), upload.metadata.filename()) {
            (Some(Ok(owner)), Some(filename)) => (owner, filename),
            _ => {
                debug!(upload_id = %upload.id, "upload has no owner or filename, not adopting");
                stats.skipped += 1;
                return Ok(());
            }
        };
        let Ok(size) = i64::try_from(upload.size) else {
            stats.skipped += 1;
            return Ok(());
        };
        if self.metadata.get_user(owner).await?.is_none() {
            debug!(upload_id = %upload.id, owner, "upload owner no longer exists, not adopting");
            stats.skipped += 1;
            return Ok(());
        }

        match self
            .metadata
            .create_upload(upload.id.as_str(), owner, filename, size)
            .await
        {
            Ok(_) => {}
            // The synchronizer got there first
            Err(MetadataError::AlreadyExists(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if upload.is_complete() {
            self.metadata.mark_completed(upload.id.as_str()).await?;
        }

        stats.adopted += 1;
        RECONCILE_ACTIONS.with_label_values(&["adopted"]).inc();
        info!(upload_id = %upload.id, owner, "adopted untracked upload");
        Ok(())
    }

    async fn prune_missing(
        &self,
        cutoff: OffsetDateTime,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        for row in self.metadata.list_uploads_created_before(cutoff).await? {
            // Held until the row is gone so a gate delete cannot interleave
            let _lock = match UploadId::parse(&row.file_id) {
                Ok(id) => {
                    let lock = match self.engine.try_lock(&id) {
                        Ok(lock) => lock,
                        Err(EngineError::Locked(_)) => {
                            debug!(upload_id = %row.file_id, "upload busy, not pruning");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    match self.engine.info(&id).await {
                        Ok(_) => continue,
                        Err(EngineError::NotFound(_)) => Some(lock),
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(_) => None,
            };

            match self.metadata.delete_upload(&row.file_id).await {
                Ok(()) => {}
                Err(MetadataError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
            stats.pruned += 1;
            RECONCILE_ACTIONS.with_label_values(&["pruned"]).inc();
            info!(upload_id = %row.file_id, owner = row.owner, "pruned ledger row without upload");
        }
        Ok(())
    }
}
