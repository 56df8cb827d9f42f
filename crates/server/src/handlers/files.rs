//! File listing, download and deletion.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult, NO_FILES_FOUND};
use crate::handlers::common::parse_upload_id;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use upvault_core::UserId;
use upvault_engine::EngineError;
use upvault_metadata::UploadRepo;
use upvault_metadata::models::UploadRow;

/// Metadata key clients use for the MIME type of an upload.
const FILETYPE_METADATA_KEY: &str = "filetype";

/// One entry of `GET /files`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub file_id: String,
    pub owner: UserId,
    pub filename: String,
    pub size: i64,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl From<UploadRow> for FileResponse {
    fn from(row: UploadRow) -> Self {
        Self {
            file_id: row.file_id,
            owner: row.owner,
            filename: row.filename,
            size: row.size,
            completed: row.completed,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

/// GET /files - List the caller's uploads in creation order.
pub async fn list_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let user_id = require_auth(&req)?.user_id;

    let rows = state
        .metadata
        .list_uploads_by_owner(user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id, error = %e, "failed to list uploads");
            ApiError::NotFound(NO_FILES_FOUND.to_string())
        })?;

    Ok(Json(rows.into_iter().map(FileResponse::from).collect()))
}

/// GET /files/{upload_id} - Stream the bytes received so far.
pub async fn get_file(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let user_id = require_auth(&req)?.user_id;
    let id = parse_upload_id(&upload_id)?;

    state.gate().authorize_upload(user_id, &id).await?;
    let (info, stream) = match state.engine.read(&id).await {
        Ok(found) => found,
        Err(EngineError::NotFound(_)) => return Err(ApiError::file_not_found()),
        Err(e) => return Err(e.into()),
    };

    let content_type = info
        .metadata
        .get(FILETYPE_METADATA_KEY)
        .filter(|v| is_header_safe(v))
        .unwrap_or("application/octet-stream")
        .to_string();
    let disposition = match info.metadata.filename() {
        Some(name) => format!("attachment; filename=\"{}\"", sanitize_filename(name)),
        None => "attachment".to_string(),
    };

    let body_stream = stream.map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, info.offset.to_string()),
            (CONTENT_DISPOSITION, disposition),
            (CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// DELETE /files/{upload_id} and DELETE /tus/{upload_id} - Delete an upload.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let user_id = require_auth(&req)?.user_id;
    let id = parse_upload_id(&upload_id)?;

    state.gate().delete(user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn is_header_safe(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
}

/// Keep a client-supplied filename safe inside a quoted header parameter.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    if cleaned.trim().is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}
