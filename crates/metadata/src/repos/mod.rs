//! Repository traits for metadata operations.

pub mod tokens;
pub mod uploads;
pub mod users;

pub use tokens::CredentialRepo;
pub use uploads::UploadRepo;
pub use users::{CredentialMinter, UserRepo};
