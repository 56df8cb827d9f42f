//! User repository.

use crate::error::MetadataResult;
use crate::models::UserRow;
use async_trait::async_trait;
use upvault_core::TokenIssuer;

/// Mints the bearer token stored alongside a user's credential row.
pub trait CredentialMinter: Send + Sync {
    fn mint(&self, user_id: i64) -> Result<String, String>;
}

impl CredentialMinter for TokenIssuer {
    fn mint(&self, user_id: i64) -> Result<String, String> {
        self.issue(user_id).map_err(|e| e.to_string())
    }
}

/// Repository for user accounts.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Create a user and its first credential in one transaction.
    ///
    /// Returns the new user and the minted token. A taken email fails with
    /// `AlreadyExists`; any failure leaves no user row behind.
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        minter: &dyn CredentialMinter,
    ) -> MetadataResult<(UserRow, String)>;

    /// Get a user by id.
    async fn get_user(&self, user_id: i64) -> MetadataResult<Option<UserRow>>;

    /// Get a user by email.
    async fn get_user_by_email(&self, email: &str) -> MetadataResult<Option<UserRow>>;

    /// Delete a user and its credential. Uploads are left to the caller.
    async fn delete_user(&self, email: &str) -> MetadataResult<()>;
}
