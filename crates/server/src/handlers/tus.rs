//! tus 1.0 endpoints under `/tus`.
//!
//! Creation, offset queries and chunk appends go through the authorization
//! gate. Termination shares the `DELETE /files/{id}` handler.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::parse_upload_id;
use crate::metrics::BYTES_RECEIVED;
use crate::state::AppState;
use axum::extract::{Path, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use upvault_core::UploadMetadata;
use upvault_engine::protocol::{
    OFFSET_CONTENT_TYPE, TUS_EXTENSION, TUS_EXTENSIONS, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION,
    TUS_VERSION_HEADER, UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
    check_resumable, parse_length,
};

/// Path prefix the tus endpoints are mounted under.
pub const TUS_BASE_PATH: &str = "/tus";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Absolute URL of a new upload, honouring reverse proxy headers.
/// Falls back to a relative path when the host is unknown.
fn upload_location(headers: &HeaderMap, upload_id: &str) -> String {
    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, HOST.as_str()))
        .map(|h| h.split(',').next().unwrap_or(h).trim())
        .filter(|h| !h.is_empty());

    match host {
        Some(host) => {
            let proto = header_str(headers, "x-forwarded-proto")
                .map(|p| p.split(',').next().unwrap_or(p).trim())
                .filter(|p| *p == "http" || *p == "https")
                .unwrap_or("http");
            format!("{proto}://{host}{TUS_BASE_PATH}/{upload_id}")
        }
        None => format!("{TUS_BASE_PATH}/{upload_id}"),
    }
}

/// Add `Tus-Resumable` to every response from the tus routes.
pub async fn tus_resumable_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        HeaderName::from_static(TUS_RESUMABLE),
        HeaderValue::from_static(TUS_VERSION),
    );
    response
}

/// OPTIONS /tus - Advertise the supported protocol.
pub async fn tus_options(State(state): State<AppState>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(TUS_VERSION_HEADER),
        HeaderValue::from_static(TUS_VERSION),
    );
    headers.insert(
        HeaderName::from_static(TUS_EXTENSION),
        HeaderValue::from_static(TUS_EXTENSIONS),
    );
    if let Some(max) = state.engine.max_size() {
        headers.insert(HeaderName::from_static(TUS_MAX_SIZE), HeaderValue::from(max));
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}

/// POST /tus - Create an upload owned by the caller.
#[tracing::instrument(skip(state, req))]
pub async fn create_upload(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let user_id = require_auth(&req)?.user_id;
    let headers = req.headers();
    check_resumable(header_str(headers, TUS_RESUMABLE))?;

    if headers.contains_key(UPLOAD_DEFER_LENGTH) {
        return Err(ApiError::BadRequest(
            "Upload-Defer-Length is not supported".to_string(),
        ));
    }
    let size = parse_length("Upload-Length", header_str(headers, UPLOAD_LENGTH))?;
    let metadata = match headers.get(UPLOAD_METADATA) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Upload-Metadata is not ASCII".to_string()))?;
            UploadMetadata::parse(raw)?
        }
        None => UploadMetadata::new(),
    };
    let request_headers = headers.clone();

    let info = state.gate().create(user_id, size, metadata).await?;

    Ok((
        StatusCode::CREATED,
        [
            (LOCATION, upload_location(&request_headers, info.id.as_str())),
            (HeaderName::from_static(UPLOAD_OFFSET), info.offset.to_string()),
        ],
    )
        .into_response())
}

/// HEAD /tus/{upload_id} - Report the current offset.
pub async fn head_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let user_id = require_auth(&req)?.user_id;
    check_resumable(header_str(req.headers(), TUS_RESUMABLE))?;
    let id = parse_upload_id(&upload_id)?;

    let info = state.gate().open(user_id, &id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static(UPLOAD_OFFSET), HeaderValue::from(info.offset));
    headers.insert(HeaderName::from_static(UPLOAD_LENGTH), HeaderValue::from(info.size));
    if !info.metadata.is_empty() {
        let encoded = HeaderValue::from_str(&info.metadata.to_header())
            .map_err(|e| ApiError::Internal(format!("unencodable upload metadata: {e}")))?;
        headers.insert(HeaderName::from_static(UPLOAD_METADATA), encoded);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::OK, headers).into_response())
}

/// PATCH /tus/{upload_id} - Append a chunk at `Upload-Offset`.
#[tracing::instrument(skip(state, req))]
pub async fn patch_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let user_id = require_auth(&req)?.user_id;
    let headers = req.headers();
    check_resumable(header_str(headers, TUS_RESUMABLE))?;

    let content_type = header_str(headers, CONTENT_TYPE.as_str()).unwrap_or_default();
    if content_type != OFFSET_CONTENT_TYPE {
        return Err(ApiError::UnsupportedMediaType(format!(
            "expected {OFFSET_CONTENT_TYPE}, got {content_type:?}"
        )));
    }
    let offset = parse_length("Upload-Offset", header_str(headers, UPLOAD_OFFSET))?;
    let content_length = match headers.get(CONTENT_LENGTH) {
        Some(value) => Some(parse_length("Content-Length", value.to_str().ok())?),
        None => None,
    };
    let id = parse_upload_id(&upload_id)?;
    let body = req.into_body();

    state.gate().open(user_id, &id).await?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other));
    let info = state
        .engine
        .patch(&id, offset, content_length, Box::pin(stream))
        .await?;
    BYTES_RECEIVED.inc_by(info.offset.saturating_sub(offset));

    Ok((
        StatusCode::NO_CONTENT,
        [(HeaderName::from_static(UPLOAD_OFFSET), info.offset.to_string())],
    )
        .into_response())
}
