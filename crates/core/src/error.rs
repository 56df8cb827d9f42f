//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid upload id: {0}")]
    InvalidUploadId(String),

    #[error("invalid upload metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("missing required configuration: {0}")]
    ConfigMissing(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
