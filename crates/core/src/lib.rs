//! Core domain types and shared logic for upvault.
//!
//! This crate defines the pieces every other crate agrees on:
//! - Application configuration
//! - Upload identifiers and the `Upload-Metadata` header codec
//! - Bearer token issuance and verification

pub mod config;
pub mod error;
pub mod metadata;
pub mod token;
pub mod upload;

pub use error::{Error, Result};
pub use metadata::UploadMetadata;
pub use token::{Claims, TokenError, TokenIssuer, UserId};
pub use upload::UploadId;

/// Metadata key carrying the owning user id, injected by the server.
pub const OWNER_METADATA_KEY: &str = "user_id";

/// Metadata key carrying the client's original filename.
pub const FILENAME_METADATA_KEY: &str = "filename";
