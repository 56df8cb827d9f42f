//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use serde::Serialize;
use serde::de::DeserializeOwned;
use upvault_core::UploadId;
use upvault_metadata::MetadataStore;

/// Maximum request body size for JSON account requests (64 KiB).
const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - Check the metadata store and upload directory.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.engine.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Parse an upload id from the request path.
///
/// Malformed ids can never name an upload, so they report the same 404 as
/// unknown ones.
pub fn parse_upload_id(raw: &str) -> ApiResult<UploadId> {
    UploadId::parse(raw).map_err(|_| ApiError::file_not_found())
}

/// Read and deserialize a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}
