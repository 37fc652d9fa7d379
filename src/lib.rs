pub mod config;
pub mod cut;
pub mod engine;
pub mod error;
pub mod memory;
pub mod merge;
pub mod model;
pub mod order;
pub mod pipeline;
pub mod probe;
pub mod sidecar_api;
#[cfg(any(test, feature = "integration-test-api"))]
pub mod test_support;
