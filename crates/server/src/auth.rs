//! Bearer authentication middleware.

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_auth_failure;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use upvault_core::token::hash_token;
use upvault_core::{TokenError, UserId};
use upvault_metadata::CredentialRepo;
use uuid::Uuid;

/// Request/response header carrying the trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping at most
    /// `MAX_TRACE_ID_LEN` printable ASCII characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity resolved from a valid bearer token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|token| !token.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Resolve a bearer token to a user.
///
/// The signature and expiry must check out, and the token must still be the
/// user's active credential: logging in again or out revokes older tokens.
async fn authenticate(state: &AppState, token: &str) -> ApiResult<Option<AuthenticatedUser>> {
    let claims = match state.issuer.verify(token) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => {
            record_auth_failure("expired");
            tracing::debug!("rejected expired bearer token");
            return Ok(None);
        }
        Err(e) => {
            record_auth_failure("invalid");
            tracing::debug!(error = %e, "rejected bearer token");
            return Ok(None);
        }
    };

    match state
        .metadata
        .get_credential_by_hash(&hash_token(token))
        .await?
    {
        Some(credential) if credential.uid == claims.user_id => Ok(Some(AuthenticatedUser {
            user_id: claims.user_id,
        })),
        Some(credential) => {
            record_auth_failure("mismatch");
            tracing::warn!(
                claimed = claims.user_id,
                owner = credential.uid,
                "bearer token claims a different user than its credential"
            );
            Ok(None)
        }
        None => {
            record_auth_failure("revoked");
            tracing::debug!(user_id = claims.user_id, "bearer token is no longer active");
            Ok(None)
        }
    }
}

/// Authentication middleware that validates tokens and sets up trace context.
///
/// The trace id is echoed back in `X-Trace-Id`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let user = match extract_bearer_token(&req) {
        Some(token) => authenticate(&state, token).await?,
        None => None,
    };
    if let Some(user) = user {
        req.extensions_mut().insert(user);
    }

    let span = match user {
        Some(user) => tracing::info_span!("request", trace_id = %trace_id_str, user_id = user.user_id),
        None => tracing::info_span!("request", trace_id = %trace_id_str),
    };
    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id_str) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    Ok(response)
}

/// Require authentication (a valid token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(ApiError::unauthorized)
}
