//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Users and credentials
// =============================================================================

/// Registered account.
#[derive(Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

impl std::fmt::Debug for UserRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRow")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// The single active bearer credential of a user.
///
/// Only the SHA-256 hex digest of the token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: i64,
    /// Owning user id.
    pub uid: i64,
    pub token_hash: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Upload ownership ledger
// =============================================================================

/// Ownership and completion record of one upload.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub id: i64,
    /// Engine-assigned upload id.
    pub file_id: String,
    /// Owning user id.
    pub owner: i64,
    pub filename: String,
    pub size: i64,
    pub completed: bool,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}
