use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempDir;
use upvault_engine::{
    BodyStream, EventReceivers, FilesystemStore, UploadEngine, UploadStore, event_channels,
};

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// A request body delivering `data` as a single chunk.
pub fn body_from(data: impl Into<Bytes>) -> BodyStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// A request body delivering `data` in chunks of `chunk_size` bytes.
pub fn chunked_body(data: Bytes, chunk_size: usize) -> BodyStream {
    let chunks: Vec<std::io::Result<Bytes>> = data
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

/// An engine over a temporary filesystem store plus its event receivers.
#[allow(dead_code)]
pub struct TestEngine {
    pub engine: UploadEngine,
    pub events: EventReceivers,
    pub store: Arc<dyn UploadStore>,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TestEngine {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn UploadStore> =
            Arc::new(FilesystemStore::new(dir.path()).await.unwrap());
        Self::with_store(store, dir)
    }

    pub fn with_store(store: Arc<dyn UploadStore>, dir: TempDir) -> Self {
        let (senders, events) = event_channels(16);
        let engine = UploadEngine::new(store.clone(), senders);
        Self {
            engine,
            events,
            store,
            dir,
        }
    }
}
