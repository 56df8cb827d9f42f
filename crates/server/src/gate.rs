//! Authorization gate between authenticated requests and the upload engine.
//!
//! Every upload operation except creation names an existing upload, and the
//! caller must own it. Ownership comes from the ledger. While the *created*
//! event for a fresh upload is still queued there is no ledger row yet, so the
//! owner injected into the engine's stored metadata is used instead.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{OWNERSHIP_DENIALS, UPLOADS_CREATED, UPLOADS_DELETED};
use tracing::{info, warn};
use upvault_core::{OWNER_METADATA_KEY, UploadId, UploadMetadata, UserId};
use upvault_engine::{EngineError, UploadEngine, UploadInfo};
use upvault_metadata::{MetadataError, MetadataStore, UploadRepo};

/// Who owns an upload, as far as the gate can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    /// Neither the ledger nor the engine knows the upload.
    Missing,
    /// Recorded in the ledger.
    Tracked(UserId),
    /// Not in the ledger yet; owner read from the engine's stored metadata.
    Pending(UserId),
    /// The engine holds the upload but it carries no usable owner.
    Unclaimed,
}

/// Ownership checks in front of the engine.
pub struct AuthorizationGate<'a> {
    metadata: &'a dyn MetadataStore,
    engine: &'a UploadEngine,
}

impl<'a> AuthorizationGate<'a> {
    pub fn new(metadata: &'a dyn MetadataStore, engine: &'a UploadEngine) -> Self {
        Self { metadata, engine }
    }

    /// Create an upload owned by `user`.
    ///
    /// Any owner key the client put in the metadata is replaced.
    pub async fn create(
        &self,
        user: UserId,
        size: u64,
        mut metadata: UploadMetadata,
    ) -> ApiResult<UploadInfo> {
        if metadata.remove(OWNER_METADATA_KEY).is_some() {
            warn!(user_id = user, "discarding client supplied upload owner");
        }
        metadata.set_owner(user);

        let info = self.engine.create(size, metadata).await?;
        UPLOADS_CREATED.inc();
        Ok(info)
    }

    /// Require that `user` owns the upload.
    pub async fn authorize_upload(&self, user: UserId, id: &UploadId) -> ApiResult<()> {
        self.check_owner(user, id).await.map(|_| ())
    }

    async fn check_owner(&self, user: UserId, id: &UploadId) -> ApiResult<Owner> {
        match self.resolve_owner(id).await? {
            Owner::Missing => Err(ApiError::file_not_found()),
            owner @ (Owner::Tracked(u) | Owner::Pending(u)) if u == user => Ok(owner),
            Owner::Tracked(_) | Owner::Pending(_) | Owner::Unclaimed => {
                OWNERSHIP_DENIALS.inc();
                warn!(user_id = user, upload_id = %id, "refusing access to upload owned by another user");
                Err(ApiError::unauthorized())
            }
        }
    }

    /// Authorize `user` and return the upload's current engine state.
    pub async fn open(&self, user: UserId, id: &UploadId) -> ApiResult<UploadInfo> {
        self.authorize_upload(user, id).await?;
        match self.engine.info(id).await {
            Ok(info) => Ok(info),
            Err(EngineError::NotFound(_)) => Err(ApiError::file_not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an upload owned by `user` from the engine, then the ledger.
    ///
    /// Nothing is touched unless the ownership check passes, and a failed
    /// engine delete leaves the ledger row in place. Both deletes run under
    /// the upload's engine lock, which the reconciliation sweep also takes
    /// before pruning a row, so neither a racing delete nor the sweep can
    /// remove the row between them. The loser of a race finds the engine
    /// object gone and reports the ledger's verdict.
    pub async fn delete(&self, user: UserId, id: &UploadId) -> ApiResult<()> {
        let owner = self.check_owner(user, id).await?;

        let lock = self.engine.lock(id).await;
        let terminated = match self.engine.terminate_locked(&lock).await {
            Ok(()) => true,
            Err(EngineError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };

        match self.metadata.authorize_and_delete(user, id.as_str()).await {
            Ok(()) => {}
            // Created event not consumed yet; the sweep prunes the late row
            Err(MetadataError::NotFound(_)) if terminated && matches!(owner, Owner::Pending(_)) => {}
            Err(MetadataError::NotFound(_)) => return Err(ApiError::file_not_found()),
            Err(MetadataError::Unauthorized(_)) => {
                OWNERSHIP_DENIALS.inc();
                return Err(ApiError::unauthorized());
            }
            Err(e) => return Err(e.into()),
        }
        drop(lock);

        UPLOADS_DELETED.inc();
        info!(user_id = user, upload_id = %id, "upload deleted");
        Ok(())
    }

    async fn resolve_owner(&self, id: &UploadId) -> ApiResult<Owner> {
        if let Some(row) = self.metadata.get_upload(id.as_str()).await? {
            return Ok(Owner::Tracked(row.owner));
        }

        match self.engine.info(id).await {
            Ok(info) => Ok(match info.metadata.owner() {
                Some(Ok(owner)) => Owner::Pending(owner),
                _ => Owner::Unclaimed,
            }),
            Err(EngineError::NotFound(_)) => Ok(Owner::Missing),
            Err(e) => Err(e.into()),
        }
    }
}
