pub mod fixtures;
pub mod providers;

#[allow(unused_imports)]
pub use fixtures::{CancelAfter, CountingGate, seeded_bytes, test_config};
#[allow(unused_imports)]
pub use providers::{MockBehavior, MockProvider};
