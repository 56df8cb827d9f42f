//! Credential repository.

use crate::error::MetadataResult;
use crate::models::CredentialRow;
use crate::repos::users::CredentialMinter;
use async_trait::async_trait;

/// Repository for bearer credentials. A user holds at most one.
#[async_trait]
pub trait CredentialRepo: Send + Sync {
    /// Mint a fresh token for the user and replace any existing credential.
    ///
    /// Fails with `NotFound` if the user does not exist.
    async fn issue_credential(
        &self,
        user_id: i64,
        minter: &dyn CredentialMinter,
    ) -> MetadataResult<String>;

    /// Get the active credential of a user.
    async fn get_credential(&self, user_id: i64) -> MetadataResult<Option<CredentialRow>>;

    /// Get a credential by token hash.
    async fn get_credential_by_hash(&self, token_hash: &str)
    -> MetadataResult<Option<CredentialRow>>;

    /// Delete the user's credential. Fails with `NotFound` if there is none.
    async fn revoke_credential(&self, user_id: i64) -> MetadataResult<()>;
}
