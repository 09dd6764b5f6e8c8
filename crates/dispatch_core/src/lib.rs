pub mod clock;
pub mod config;
pub mod ecs;
pub mod engine;
pub mod error;
pub mod geofence;
pub mod history;
pub mod matching;
pub mod pricing;
pub mod protocol;
pub mod registry;
pub mod spatial;
pub mod systems;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
