//! Resumable upload engine for upvault.
//!
//! This crate provides:
//! - The tus 1.0 core protocol with the creation and termination extensions
//! - A filesystem upload store with atomic info writes
//! - Bounded *created* and *completed* lifecycle event channels

pub mod backends;
pub mod engine;
pub mod error;
pub mod events;
pub mod protocol;
pub mod traits;

pub use backends::filesystem::FilesystemStore;
pub use engine::{MAX_UPLOAD_SIZE, UploadEngine, UploadLock};
pub use error::{EngineError, EngineResult};
pub use events::{
    ChannelClosed, EventReceiver, EventReceivers, EventSender, EventSenders, UploadEvent,
    UploadEventKind, event_channels,
};
pub use traits::{BodyStream, ByteStream, UploadInfo, UploadStore};

use std::sync::Arc;
use upvault_core::config::StorageConfig;

/// Create an upload store from configuration.
pub async fn from_config(config: &StorageConfig) -> EngineResult<Arc<dyn UploadStore>> {
    if config.path.as_os_str().is_empty() {
        return Err(EngineError::Config("storage.path must not be empty".to_string()));
    }
    let store = FilesystemStore::new(&config.path).await?;
    Ok(Arc::new(store))
}
