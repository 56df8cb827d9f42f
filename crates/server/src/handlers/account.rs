//! Account endpoints: signup, login, logout and account deletion.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult, BAD_CREDENTIALS, EMAIL_TAKEN};
use crate::handlers::common::{parse_upload_id, read_json};
use crate::metrics::{LOGINS, USERS_CREATED};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use upvault_core::UserId;
use upvault_metadata::{CredentialRepo, MetadataError, UploadRepo, UserRepo};

/// Body of `POST /signup` and `POST /login`.
#[derive(Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

impl CredentialsRequest {
    fn validate(&self) -> ApiResult<()> {
        if self.email.trim().is_empty() {
            return Err(ApiError::BadRequest("email must not be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(ApiError::BadRequest("password must not be empty".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Response of a successful login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub owning_user_id: UserId,
    pub token: String,
}

/// POST /signup - Create an account.
///
/// The user row and its first credential are written in one transaction.
pub async fn signup(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let body: CredentialsRequest = read_json(req).await?;
    body.validate()?;
    let email = body.email.trim();

    let password_hash = state.passwords.hash(body.password).await?;
    match state
        .metadata
        .create_user(email, &password_hash, state.issuer.as_ref())
        .await
    {
        Ok((user, _token)) => {
            USERS_CREATED.inc();
            info!(user_id = user.id, "user signed up");
            Ok(StatusCode::CREATED)
        }
        Err(MetadataError::AlreadyExists(_)) => Err(ApiError::Unauthorized(EMAIL_TAKEN.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// POST /login - Exchange email and password for a fresh bearer token.
///
/// Unknown emails and wrong passwords produce the same response, and the
/// previous token of the user stops working.
pub async fn login(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<LoginResponse>> {
    let body: CredentialsRequest = read_json(req).await?;
    body.validate()?;

    let user = state.metadata.get_user_by_email(body.email.trim()).await?;
    let stored = user.as_ref().map(|u| u.password_hash.clone());
    let valid = state.passwords.verify(body.password, stored).await?;

    let user = match user {
        Some(user) if valid => user,
        _ => {
            LOGINS.with_label_values(&["failure"]).inc();
            return Err(ApiError::Unauthorized(BAD_CREDENTIALS.to_string()));
        }
    };

    let token = state
        .metadata
        .issue_credential(user.id, state.issuer.as_ref())
        .await?;
    LOGINS.with_label_values(&["success"]).inc();
    info!(user_id = user.id, "user logged in");

    Ok(Json(LoginResponse {
        owning_user_id: user.id,
        token,
    }))
}

/// POST /logout - Revoke the caller's credential.
pub async fn logout(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let user_id = require_auth(&req)?.user_id;

    match state.metadata.revoke_credential(user_id).await {
        // Revoked concurrently; the caller is logged out either way
        Ok(()) | Err(MetadataError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    info!(user_id, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /account - Delete the caller, their uploads and their credential.
///
/// Uploads go first, through the same path as a user-initiated delete, so a
/// failure leaves an account that can still retry.
pub async fn delete_account(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let user_id = require_auth(&req)?.user_id;
    let user = state
        .metadata
        .get_user(user_id)
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    let gate = state.gate();
    let uploads = state.metadata.list_uploads_by_owner(user_id).await?;
    let mut deleted = 0usize;
    for row in &uploads {
        let id = match parse_upload_id(&row.file_id) {
            Ok(id) => id,
            Err(_) => {
                warn!(upload_id = %row.file_id, "dropping ledger row with malformed id");
                match state.metadata.delete_upload(&row.file_id).await {
                    Ok(()) | Err(MetadataError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
        };
        match gate.delete(user_id, &id).await {
            Ok(()) => deleted += 1,
            // Removed concurrently
            Err(ApiError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    match state.metadata.delete_user(&user.email).await {
        Ok(()) | Err(MetadataError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }
    info!(user_id, uploads = deleted, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}
