//! HTTP server for upvault.
//!
//! This crate provides:
//! - Account endpoints (signup, login, logout, account deletion)
//! - Bearer authentication against the single active credential per user
//! - tus upload endpoints behind an ownership gate
//! - The lifecycle synchronizer feeding the upload ledger
//! - A periodic reconciliation sweep between engine and ledger

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod metrics;
pub mod password;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod sync;

pub use auth::{AuthenticatedUser, TraceId};
pub use error::ApiError;
pub use gate::AuthorizationGate;
pub use reconcile::{ReconcileStats, Reconciler};
pub use routes::create_router;
pub use state::AppState;
pub use sync::{SyncError, SyncHandle, Synchronizer};
