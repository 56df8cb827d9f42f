use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use upvault_core::UploadId;
use upvault_engine::error::EngineResult;
use upvault_engine::traits::{BodyStream, ByteStream, UploadInfo, UploadStore};

/// Store wrapper whose `write` parks until released, so tests can hold an
/// upload mid-PATCH while issuing other requests.
#[allow(dead_code)]
pub struct GatedStore {
    inner: Arc<dyn UploadStore>,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[allow(dead_code)]
impl GatedStore {
    pub fn new(inner: Arc<dyn UploadStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
    }
}

#[async_trait]
impl UploadStore for GatedStore {
    async fn create(&self, info: &UploadInfo) -> EngineResult<()> {
        self.inner.create(info).await
    }

    async fn info(&self, id: &UploadId) -> EngineResult<UploadInfo> {
        self.inner.info(id).await
    }

    async fn write(
        &self,
        id: &UploadId,
        offset: u64,
        limit: u64,
        body: BodyStream,
    ) -> EngineResult<u64> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.write(id, offset, limit, body).await
    }

    async fn read(&self, id: &UploadId) -> EngineResult<ByteStream> {
        self.inner.read(id).await
    }

    async fn terminate(&self, id: &UploadId) -> EngineResult<()> {
        self.inner.terminate(id).await
    }

    async fn list_ids(&self) -> EngineResult<Vec<UploadId>> {
        self.inner.list_ids().await
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }
}
