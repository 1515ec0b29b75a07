//! One SDK config per process
//!
//! Credentials and region are resolved once into an [`AwsContext`]; the IAM
//! and S3 wrappers are then built from it with [`FromAwsContext`], so every
//! client of a run talks to the same account and region.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;

/// Loaded SDK configuration plus the region it was loaded for.
///
/// # Example
/// ```ignore
/// let aws = AwsContext::new("us-east-1", None).await;
/// let cloud = AwsCloud::from_context(&aws);
/// ```
#[derive(Clone)]
pub struct AwsContext {
    config: Arc<SdkConfig>,
    region: String,
}

impl AwsContext {
    /// Resolve credentials through the default provider chain.
    ///
    /// `profile` picks a named profile from the shared config files instead
    /// of the default one.
    pub async fn new(region: &str, profile: Option<&str>) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }

        Self {
            config: Arc::new(loader.load().await),
            region: region.to_string(),
        }
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Region buckets are created in
    pub fn region(&self) -> &str {
        &self.region
    }

    /// IAM is global; the client still carries the context's region
    pub fn iam_client(&self) -> aws_sdk_iam::Client {
        aws_sdk_iam::Client::new(&self.config)
    }

    pub fn s3_client(&self) -> aws_sdk_s3::Client {
        aws_sdk_s3::Client::new(&self.config)
    }
}

impl std::fmt::Debug for AwsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsContext")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Construct a service wrapper from a pre-loaded [`AwsContext`]
pub trait FromAwsContext {
    fn from_context(ctx: &AwsContext) -> Self;
}
