//! Password hashing.
//!
//! bcrypt is deliberately slow, so every hash and verification runs on the
//! blocking pool rather than an async worker.

use crate::error::{ApiError, ApiResult};
use std::sync::{Arc, OnceLock};

/// Hashes and verifies passwords with a fixed bcrypt cost.
pub struct PasswordHasher {
    cost: u32,
    /// Verified against when the account does not exist, so unknown emails
    /// take as long to reject as wrong passwords.
    dummy: OnceLock<String>,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            dummy: OnceLock::new(),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password for storage.
    pub async fn hash(self: &Arc<Self>, password: String) -> ApiResult<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || bcrypt::hash(password, hasher.cost))
            .await
            .map_err(|e| ApiError::Internal(format!("spawn_blocking failed: {e}")))?
            .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))
    }

    /// Check a password against a stored hash.
    ///
    /// With no stored hash the password is checked against a dummy hash and
    /// the result is always `false`.
    pub async fn verify(self: &Arc<Self>, password: String, stored: Option<String>) -> ApiResult<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || match stored {
            Some(hash) => match bcrypt::verify(&password, &hash) {
                Ok(valid) => Ok(valid),
                Err(e) => {
                    tracing::warn!(error = %e, "stored password hash is unreadable");
                    Ok(false)
                }
            },
            None => {
                let dummy = hasher.dummy_hash()?;
                let _ = bcrypt::verify(&password, &dummy);
                Ok(false)
            }
        })
        .await
        .map_err(|e| ApiError::Internal(format!("spawn_blocking failed: {e}")))?
    }

    fn dummy_hash(&self) -> ApiResult<String> {
        if let Some(hash) = self.dummy.get() {
            return Ok(hash.clone());
        }
        let hash = bcrypt::hash("upvault-dummy-password", self.cost)
            .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))?;
        Ok(self.dummy.get_or_init(|| hash).clone())
    }
}
