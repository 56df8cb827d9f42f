//! Upload engine error types.

use thiserror::Error;

/// Upload engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("upload already exists: {0}")]
    AlreadyExists(String),

    #[error("upload is locked by another request: {0}")]
    Locked(String),

    #[error("offset mismatch: upload is at {expected}, request sent {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("upload length exceeded: declared {declared} bytes, received at least {received}")]
    LengthExceeded { declared: u64, received: u64 },

    #[error("upload size {size} exceeds maximum {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported tus version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid upload id: {0}")]
    InvalidId(String),

    #[error("request body error: {0}")]
    Body(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt upload info: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<upvault_core::Error> for EngineError {
    fn from(err: upvault_core::Error) -> Self {
        match err {
            upvault_core::Error::InvalidUploadId(id) => EngineError::InvalidId(id),
            other => EngineError::InvalidRequest(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
