//! The upload engine: tus semantics on top of an [`UploadStore`].

use crate::error::{EngineError, EngineResult};
use crate::events::{EventSender, EventSenders};
use crate::traits::{BodyStream, ByteStream, UploadInfo, UploadStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use upvault_core::{UploadId, UploadMetadata};

/// Largest declared length accepted: sizes are stored as signed 64-bit
/// integers downstream.
pub const MAX_UPLOAD_SIZE: u64 = i64::MAX as u64;

/// Drives uploads through their lifecycle and publishes lifecycle events.
///
/// Events are published only after the corresponding state is persisted,
/// so a consumer never observes an upload the store does not know about.
pub struct UploadEngine {
    store: Arc<dyn UploadStore>,
    events: EventSenders,
    max_size: Option<u64>,
    locks: UploadLocks,
}

impl UploadEngine {
    pub fn new(store: Arc<dyn UploadStore>, events: EventSenders) -> Self {
        Self {
            store,
            events,
            max_size: None,
            locks: UploadLocks::default(),
        }
    }

    /// Reject uploads declaring more than `max_size` bytes. Never above
    /// [`MAX_UPLOAD_SIZE`].
    pub fn with_max_size(mut self, max_size: Option<u64>) -> Self {
        self.max_size = max_size.map(|max| max.min(MAX_UPLOAD_SIZE));
        self
    }

    pub fn max_size(&self) -> Option<u64> {
        self.max_size
    }

    pub fn store(&self) -> &Arc<dyn UploadStore> {
        &self.store
    }

    /// Create a new upload of `size` bytes.
    ///
    /// Publishes *created*, and also *completed* for a zero-length upload.
    #[instrument(skip(self, metadata))]
    pub async fn create(&self, size: u64, metadata: UploadMetadata) -> EngineResult<UploadInfo> {
        let max = self.max_size.unwrap_or(MAX_UPLOAD_SIZE);
        if size > max {
            return Err(EngineError::TooLarge { size, max });
        }

        let info = UploadInfo::new(UploadId::generate(), size, metadata);
        self.store.create(&info).await?;
        info!(upload_id = %info.id, size, "upload created");

        self.publish(&self.events.created, info.clone()).await;
        if info.is_complete() {
            self.publish(&self.events.completed, info.clone()).await;
        }
        Ok(info)
    }

    /// Current state of an upload.
    pub async fn info(&self, id: &UploadId) -> EngineResult<UploadInfo> {
        self.store.info(id).await
    }

    /// Append a chunk at `offset`.
    ///
    /// The offset must match the stored offset exactly. Publishes
    /// *completed* when this chunk delivers the final byte.
    #[instrument(skip(self, body))]
    pub async fn patch(
        &self,
        id: &UploadId,
        offset: u64,
        content_length: Option<u64>,
        body: BodyStream,
    ) -> EngineResult<UploadInfo> {
        let _lock = self.locks.acquire(id)?;

        let before = self.store.info(id).await?;
        if before.offset != offset {
            return Err(EngineError::OffsetMismatch {
                expected: before.offset,
                actual: offset,
            });
        }
        if let Some(len) = content_length
            && len > before.remaining()
        {
            return Err(EngineError::LengthExceeded {
                declared: before.size,
                received: offset + len,
            });
        }

        let result = self
            .store
            .write(id, offset, before.remaining(), body)
            .await;

        // A failed write can still have persisted the final bytes
        let after = match &result {
            Ok(_) => self.store.info(id).await?,
            Err(_) => match self.store.info(id).await {
                Ok(info) => info,
                Err(_) => return result.map(|_| before),
            },
        };
        debug!(upload_id = %id, offset = after.offset, size = after.size, "upload chunk stored");

        if !before.is_complete() && after.is_complete() {
            info!(upload_id = %id, size = after.size, "upload completed");
            self.publish(&self.events.completed, after.clone()).await;
        }

        result.map(|_| after)
    }

    /// Info plus a stream of the bytes received so far.
    pub async fn read(&self, id: &UploadId) -> EngineResult<(UploadInfo, ByteStream)> {
        let info = self.store.info(id).await?;
        let stream = self.store.read(id).await?;
        Ok((info, stream))
    }

    /// Delete an upload's data and info.
    ///
    /// Waits for an in-flight PATCH on the same upload to finish first.
    #[instrument(skip(self))]
    pub async fn terminate(&self, id: &UploadId) -> EngineResult<()> {
        let lock = self.lock(id).await;
        self.terminate_locked(&lock).await
    }

    /// Take the upload's exclusive lock, waiting for the current holder.
    ///
    /// Callers that pair termination with other bookkeeping hold it across
    /// both steps.
    pub async fn lock(&self, id: &UploadId) -> UploadLock<'_> {
        self.locks.acquire_wait(id).await
    }

    /// Take the upload's exclusive lock, or fail with
    /// [`EngineError::Locked`] if it is held.
    pub fn try_lock(&self, id: &UploadId) -> EngineResult<UploadLock<'_>> {
        self.locks.acquire(id)
    }

    /// [`terminate`](Self::terminate) for a caller already holding the lock.
    pub async fn terminate_locked(&self, lock: &UploadLock<'_>) -> EngineResult<()> {
        self.store.terminate(&lock.id).await?;
        info!(upload_id = %lock.id, "upload terminated");
        Ok(())
    }

    /// Info of every stored upload. Uploads removed while listing are skipped.
    pub async fn list(&self) -> EngineResult<Vec<UploadInfo>> {
        let ids = self.store.list_ids().await?;
        let mut uploads = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.info(&id).await {
                Ok(info) => uploads.push(info),
                Err(EngineError::NotFound(_)) => {}
                Err(e) => {
                    warn!(upload_id = %id, error = %e, "skipping unreadable upload info");
                }
            }
        }
        Ok(uploads)
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        self.store.health_check().await
    }

    async fn publish(&self, sender: &EventSender, upload: UploadInfo) {
        if let Err(e) = sender.send(upload).await {
            // Only happens during shutdown; the reconciliation sweep repairs the ledger
            warn!(upload_id = %e.0.upload.id, kind = %e.0.kind, "dropping upload event: channel closed");
        }
    }
}

/// Per-upload exclusive locks for mutating requests.
#[derive(Default)]
struct UploadLocks {
    held: Mutex<HashSet<UploadId>>,
    released: Notify,
}

impl UploadLocks {
    fn acquire(&self, id: &UploadId) -> EngineResult<UploadLock<'_>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(id.clone()) {
            return Err(EngineError::Locked(id.to_string()));
        }
        Ok(UploadLock {
            locks: self,
            id: id.clone(),
        })
    }

    async fn acquire_wait(&self, id: &UploadId) -> UploadLock<'_> {
        loop {
            // Registered before the check so a release in between is not missed
            let released = self.released.notified();
            if let Ok(lock) = self.acquire(id) {
                return lock;
            }
            released.await;
        }
    }
}

/// Exclusive hold on one upload, released on drop.
pub struct UploadLock<'a> {
    locks: &'a UploadLocks,
    id: UploadId,
}

impl UploadLock<'_> {
    pub fn id(&self) -> &UploadId {
        &self.id
    }
}

impl Drop for UploadLock<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.id);
        drop(held);
        self.locks.released.notify_waiters();
    }
}
