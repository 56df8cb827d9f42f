//! API error types.
//!
//! Error bodies are plain text, matching what existing clients already parse.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use upvault_engine::EngineError;
use upvault_engine::protocol::{TUS_VERSION, TUS_VERSION_HEADER};
use upvault_metadata::MetadataError;

pub const UNAUTHORIZED: &str = "Unauthorized";
pub const BAD_CREDENTIALS: &str = "Bad credentials";
pub const EMAIL_TAKEN: &str = "Email is already taken";
pub const FILE_NOT_FOUND: &str = "File does not exists";
pub const NO_FILES_FOUND: &str = "No files found";

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Core(#[from] upvault_core::Error),
}

impl ApiError {
    /// The generic 401 returned whenever identity or ownership checks fail.
    pub fn unauthorized() -> Self {
        Self::Unauthorized(UNAUTHORIZED.to_string())
    }

    pub fn file_not_found() -> Self {
        Self::NotFound(FILE_NOT_FOUND.to_string())
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Internal(_) => "internal_error",
            Self::Engine(_) => "engine_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(e) => match e {
                EngineError::NotFound(_) | EngineError::InvalidId(_) => StatusCode::NOT_FOUND,
                EngineError::AlreadyExists(_) | EngineError::OffsetMismatch { .. } => {
                    StatusCode::CONFLICT
                }
                EngineError::Locked(_) => StatusCode::LOCKED,
                EngineError::LengthExceeded { .. } | EngineError::TooLarge { .. } => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                EngineError::UnsupportedVersion(_) => StatusCode::PRECONDITION_FAILED,
                EngineError::InvalidRequest(_) | EngineError::Body(_) => StatusCode::BAD_REQUEST,
                EngineError::Io(_) | EngineError::Serialization(_) | EngineError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                MetadataError::AlreadyExists(_) | MetadataError::Constraint(_) => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Plain text response body.
    fn body(&self) -> String {
        match self {
            Self::Engine(EngineError::NotFound(_) | EngineError::InvalidId(_))
            | Self::Metadata(MetadataError::NotFound(_)) => FILE_NOT_FOUND.to_string(),
            Self::Metadata(MetadataError::Unauthorized(_)) => UNAUTHORIZED.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        let mut response = (status, self.body()).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if matches!(self, Self::Engine(EngineError::UnsupportedVersion(_))) {
            response
                .headers_mut()
                .insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
