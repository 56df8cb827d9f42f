//! HTTP request handlers.

pub mod account;
pub mod common;
pub mod files;
pub mod tus;

pub use account::*;
pub use common::*;
pub use files::*;
pub use tus::*;
