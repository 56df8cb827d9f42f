pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{TestEngine, body_from, chunked_body, seeded_bytes};
#[allow(unused_imports)]
pub use mocks::GatedStore;
