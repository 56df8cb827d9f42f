//! Upload ownership ledger repository.

use crate::error::MetadataResult;
use crate::models::UploadRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for upload ownership records.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Record a pending upload. A duplicate id fails with `AlreadyExists`.
    async fn create_upload(
        &self,
        upload_id: &str,
        owner: i64,
        filename: &str,
        size: i64,
    ) -> MetadataResult<UploadRow>;

    /// Mark an upload completed.
    ///
    /// Idempotent: repeating the call succeeds and keeps the first
    /// `completed_at`. Fails with `NotFound` for an unknown id.
    async fn mark_completed(&self, upload_id: &str) -> MetadataResult<()>;

    /// List an owner's uploads in insertion order.
    async fn list_uploads_by_owner(&self, owner: i64) -> MetadataResult<Vec<UploadRow>>;

    /// Get an upload by id.
    async fn get_upload(&self, upload_id: &str) -> MetadataResult<Option<UploadRow>>;

    /// Delete an upload on behalf of `requester`.
    ///
    /// Fails with `NotFound` if the upload is unknown (or was deleted
    /// concurrently) and `Unauthorized` if someone else owns it. Nothing is
    /// deleted on failure.
    async fn authorize_and_delete(&self, requester: i64, upload_id: &str) -> MetadataResult<()>;

    /// Uploads recorded before `cutoff`, oldest first.
    async fn list_uploads_created_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<Vec<UploadRow>>;

    /// Delete an upload regardless of owner.
    async fn delete_upload(&self, upload_id: &str) -> MetadataResult<()>;
}
