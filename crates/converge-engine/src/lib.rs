//! converge-engine - Tag-owned convergence of AWS resources
//!
//! Given a desired config for an IAM role, IAM managed policy or S3 bucket,
//! the engine finds the remote resource (by name or by a stable id kept in
//! tags), creates it or brings it in line with the config, and refuses to
//! touch resources another manager owns.
//!
//! ## Modules
//!
//! - [`aws`]: AWS SDK clients and the production `CloudApi`
//! - [`engine`]: `put`, `destroy` and attachment reconciliation
//! - [`lister`]: Streaming discovery of managed resources
//! - [`resolver`], [`oracle`], [`guard`], [`processor`]: The engine's collaborators
//! - [`wait`]: Backoff-based waiting for eventual consistency

pub mod aws;
pub mod config;
pub mod descriptor;
pub mod diff;
pub mod engine;
pub mod error;
pub mod guard;
pub mod lister;
pub mod oracle;
pub mod processor;
pub mod resolver;
pub mod wait;

pub use config::{EngineSettings, FanOut, ListerConfig};
pub use descriptor::{DescriptorSpec, Existence, ResourceDescriptor};
pub use engine::{ConvergenceEngine, PutOutcome, ReconcileReport};
pub use error::{ConvergeError, Step, StepOutcome};
pub use wait::{PollingWaiter, WaitConfig};
