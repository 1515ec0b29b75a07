//! converge-common - Shared types for the converge workspace
//!
//! This crate holds the pieces that both the engine and its test doubles
//! need, without any AWS SDK dependencies to keep it lightweight.
//!
//! ## Modules
//!
//! - [`cloud`]: The cloud API and wait collaborator boundary traits
//! - [`defaults`]: Default configuration values
//! - [`error`]: AWS error classification
//! - [`resource_kind`]: Managed resource kinds and their static tables
//! - [`tags`]: Reserved tag keys and tag map conversion

pub mod cloud;
pub mod defaults;
pub mod error;
pub mod resource_kind;
pub mod tags;

// Re-export commonly used types
pub use cloud::{CloudApi, ConfigMap, ListScope, RawObject, Waiter};
pub use error::{AwsError, classify_aws_error};
pub use resource_kind::{ExistenceProbe, IdentityConvention, ResourceKind, UpdateCall};
pub use tags::{TagMap, TagRecord};
