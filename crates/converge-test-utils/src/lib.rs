//! Shared test utilities for converge
//!
//! This crate provides common test helpers that can be used across
//! the engine's unit and integration tests without circular dependencies.
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and unique names for live tests
//! - [`fake`]: In-memory `CloudApi` and `Waiter` implementations
//! - [`fixtures`]: Policy documents and desired-state helpers

pub mod aws;
pub mod fake;
pub mod fixtures;

// Re-export commonly used items
pub use aws::{get_test_region, test_resource_name, test_run_id};
pub use fake::{Call, FailOn, FakeCloud, FakeWaiter};
pub use fixtures::{config, owned_by};
