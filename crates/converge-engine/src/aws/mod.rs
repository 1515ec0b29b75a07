//! AWS client modules for the engine
//!
//! This module provides wrappers around AWS SDK clients for:
//! - IAM: Roles, managed policies and role policy attachments
//! - S3: Buckets, bucket policies and bucket tagging
//! - cloud: The `CloudApi` implementation dispatching to both

pub mod cloud;
pub mod context;
pub mod error;
pub mod iam;
pub mod payload;
pub mod s3;

pub use cloud::AwsCloud;
pub use context::{AwsContext, FromAwsContext};
pub use error::{classify_sdk_error, ignore_not_found};
pub use iam::IamClient;
pub use s3::S3Client;
