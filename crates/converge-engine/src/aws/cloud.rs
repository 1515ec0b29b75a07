//! AWS SDK-backed implementation of the cloud API boundary
//!
//! Dispatches each generic operation to the IAM or S3 wrapper for the
//! resource kind.

use super::context::{AwsContext, FromAwsContext};
use super::iam::IamClient;
use super::s3::S3Client;
use converge_common::{AwsError, CloudApi, ConfigMap, ListScope, RawObject, ResourceKind, TagRecord};

/// Cloud API client for IAM roles, IAM policies and S3 buckets
#[derive(Clone)]
pub struct AwsCloud {
    iam: IamClient,
    s3: S3Client,
    region: String,
}

impl FromAwsContext for AwsCloud {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            iam: IamClient::from_context(ctx),
            s3: S3Client::from_context(ctx),
            region: ctx.region().to_string(),
        }
    }
}

impl AwsCloud {
    pub fn region(&self) -> &str {
        &self.region
    }
}

fn unsupported(operation: &'static str, kind: ResourceKind) -> AwsError {
    AwsError::Unsupported {
        operation,
        kind: kind.as_str(),
    }
}

impl CloudApi for AwsCloud {
    async fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        payload: &ConfigMap,
    ) -> Result<String, AwsError> {
        match kind {
            ResourceKind::Role => self.iam.create_role(name, payload).await,
            ResourceKind::Policy => self.iam.create_policy(name, payload).await,
            ResourceKind::Bucket => self.s3.create_bucket(name, payload).await,
        }
    }

    async fn describe(&self, kind: ResourceKind, identifier: &str) -> Result<ConfigMap, AwsError> {
        match kind {
            ResourceKind::Role => self.iam.describe_role(identifier).await,
            ResourceKind::Policy => self.iam.describe_policy(identifier).await,
            ResourceKind::Bucket => self.s3.describe_bucket(identifier).await,
        }
    }

    async fn creation_date(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<Option<String>, AwsError> {
        match kind {
            ResourceKind::Bucket => self.s3.bucket_creation_date(identifier).await,
            ResourceKind::Role | ResourceKind::Policy => Ok(self
                .describe(kind, identifier)
                .await?
                .get("CreateDate")
                .and_then(|v| v.as_str())
                .map(str::to_string)),
        }
    }

    async fn update(
        &self,
        kind: ResourceKind,
        call: &str,
        identifier: &str,
        payload: &ConfigMap,
    ) -> Result<(), AwsError> {
        match (kind, call) {
            (ResourceKind::Role, "UpdateRole") => self.iam.update_role(identifier, payload).await,
            (ResourceKind::Role, "UpdateAssumeRolePolicy") => {
                self.iam.update_assume_role_policy(identifier, payload).await
            }
            (ResourceKind::Role, "PutRolePermissionsBoundary") => {
                self.iam.put_role_permissions_boundary(identifier, payload).await
            }
            (ResourceKind::Policy, "CreatePolicyVersion") => {
                self.iam.create_policy_version(identifier, payload).await
            }
            (ResourceKind::Bucket, "PutBucketPolicy") => {
                self.s3.put_bucket_policy(identifier, payload).await
            }
            _ => Err(AwsError::InvalidRequest(format!(
                "unknown update call '{call}' for {kind}"
            ))),
        }
    }

    async fn list(&self, kind: ResourceKind, scope: ListScope) -> Result<Vec<RawObject>, AwsError> {
        match kind {
            ResourceKind::Role => self.iam.list_roles().await,
            ResourceKind::Policy => self.iam.list_policies(scope).await,
            ResourceKind::Bucket => self.s3.list_buckets().await,
        }
    }

    async fn get_tags(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<Vec<TagRecord>, AwsError> {
        match kind {
            ResourceKind::Role => self.iam.list_role_tags(identifier).await,
            ResourceKind::Policy => self.iam.list_policy_tags(identifier).await,
            ResourceKind::Bucket => self.s3.get_bucket_tagging(identifier).await,
        }
    }

    async fn set_tags(
        &self,
        kind: ResourceKind,
        identifier: &str,
        tags: &[TagRecord],
    ) -> Result<(), AwsError> {
        match kind {
            ResourceKind::Role => self.iam.tag_role(identifier, tags).await,
            ResourceKind::Policy => self.iam.tag_policy(identifier, tags).await,
            ResourceKind::Bucket => self.s3.put_bucket_tagging(identifier, tags).await,
        }
    }

    async fn attach(&self, kind: ResourceKind, parent: &str, member: &str) -> Result<(), AwsError> {
        match kind {
            ResourceKind::Role => self.iam.attach_role_policy(parent, member).await,
            _ => Err(unsupported("attach", kind)),
        }
    }

    async fn detach(&self, kind: ResourceKind, parent: &str, member: &str) -> Result<(), AwsError> {
        match kind {
            ResourceKind::Role => self.iam.detach_role_policy(parent, member).await,
            _ => Err(unsupported("detach", kind)),
        }
    }

    async fn list_attached(
        &self,
        kind: ResourceKind,
        parent: &str,
    ) -> Result<Vec<String>, AwsError> {
        match kind {
            ResourceKind::Role => self.iam.list_attached_role_policies(parent).await,
            _ => Err(unsupported("list_attached", kind)),
        }
    }

    async fn delete(&self, kind: ResourceKind, identifier: &str) -> Result<(), AwsError> {
        match kind {
            ResourceKind::Role => self.iam.delete_role(identifier).await,
            ResourceKind::Policy => self.iam.delete_policy(identifier).await,
            ResourceKind::Bucket => self.s3.delete_bucket(identifier).await,
        }
    }
}
