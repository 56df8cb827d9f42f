//! Upload store backends.

pub mod filesystem;
