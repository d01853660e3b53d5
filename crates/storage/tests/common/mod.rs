pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{backends, collect, seeded_bytes};
