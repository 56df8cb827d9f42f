//! Application state shared across handlers.

use crate::gate::AuthorizationGate;
use crate::password::PasswordHasher;
use std::sync::Arc;
use upvault_core::TokenIssuer;
use upvault_core::config::AppConfig;
use upvault_engine::UploadEngine;
use upvault_metadata::MetadataStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Credential store and upload ledger.
    pub metadata: Arc<dyn MetadataStore>,
    /// Resumable upload engine.
    pub engine: Arc<UploadEngine>,
    /// Bearer token issuer, loaded once at startup.
    pub issuer: Arc<TokenIssuer>,
    /// Password hashing on the blocking pool.
    pub passwords: Arc<PasswordHasher>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        engine: Arc<UploadEngine>,
        issuer: TokenIssuer,
    ) -> Self {
        let passwords = Arc::new(PasswordHasher::new(config.auth.bcrypt_cost));
        Self {
            config: Arc::new(config),
            metadata,
            engine,
            issuer: Arc::new(issuer),
            passwords,
        }
    }

    /// Ownership checks in front of the engine.
    pub fn gate(&self) -> AuthorizationGate<'_> {
        AuthorizationGate::new(self.metadata.as_ref(), &self.engine)
    }
}
