//! Upload store trait definitions.

use crate::error::EngineResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use time::OffsetDateTime;
use upvault_core::{UploadId, UploadMetadata};

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = EngineResult<Bytes>> + Send>>;

/// A boxed stream of request body chunks handed to [`UploadStore::write`].
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Persistent state of a single upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub id: UploadId,
    /// Declared total length in bytes.
    pub size: u64,
    /// Bytes received so far.
    pub offset: u64,
    pub metadata: UploadMetadata,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
}

impl UploadInfo {
    /// A fresh upload at offset zero.
    pub fn new(id: UploadId, size: u64, metadata: UploadMetadata) -> Self {
        Self {
            id,
            size,
            offset: 0,
            metadata,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether every declared byte has been received.
    pub fn is_complete(&self) -> bool {
        self.offset >= self.size
    }

    /// Bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

/// Storage for upload data and upload info.
///
/// Implementations only persist; offset checks, locking and event emission
/// live in [`crate::UploadEngine`].
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Persist a new upload. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, info: &UploadInfo) -> EngineResult<()>;

    /// Load the stored info of an upload.
    async fn info(&self, id: &UploadId) -> EngineResult<UploadInfo>;

    /// Append `body` at `offset`, accepting at most `limit` bytes.
    ///
    /// Progress made before an error is persisted. Returns the new offset.
    async fn write(
        &self,
        id: &UploadId,
        offset: u64,
        limit: u64,
        body: BodyStream,
    ) -> EngineResult<u64>;

    /// Stream the bytes received so far.
    async fn read(&self, id: &UploadId) -> EngineResult<ByteStream>;

    /// Remove data and info. Fails with `NotFound` if the upload is unknown.
    async fn terminate(&self, id: &UploadId) -> EngineResult<()>;

    /// Ids of every stored upload.
    async fn list_ids(&self) -> EngineResult<Vec<UploadId>>;

    /// Name of this backend for logging.
    fn backend_name(&self) -> &'static str;

    /// Check that the store is usable.
    async fn health_check(&self) -> EngineResult<()> {
        Ok(())
    }
}
