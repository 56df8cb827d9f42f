//! Startup helpers.

use anyhow::{Context, Result};
use std::path::Path;
use upvault_core::{TokenIssuer, UserId};

/// User id the sample token is minted for in debug mode.
pub const DEBUG_SAMPLE_USER_ID: UserId = 123;

/// Create the upload directory if it is missing.
///
/// New directories are world-writable so the engine and any sidecar tooling
/// sharing the volume can write into it.
pub async fn ensure_storage_dir(path: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o777);

    builder
        .create(path)
        .await
        .with_context(|| format!("failed to create storage directory {}", path.display()))?;
    tracing::debug!(path = %path.display(), "storage directory ready");
    Ok(())
}

/// Mint a token for [`DEBUG_SAMPLE_USER_ID`], logged at startup in debug
/// mode so the tus endpoints can be exercised without signing up.
pub fn debug_sample_token(issuer: &TokenIssuer) -> Result<String> {
    issuer
        .issue(DEBUG_SAMPLE_USER_ID)
        .context("failed to mint debug sample token")
}
