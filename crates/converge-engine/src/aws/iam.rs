//! IAM role and managed policy operations

use super::context::{AwsContext, FromAwsContext};
use super::error::{classify_sdk_error, invalid_request};
use super::payload::{decode_document, int_field, required_str, str_field, tag_records};
use chrono::DateTime;
use converge_common::defaults::MAX_POLICY_VERSIONS;
use converge_common::{AwsError, ConfigMap, ListScope, RawObject, TagRecord};
use aws_sdk_iam::Client;
use aws_sdk_iam::types::{PolicyScopeType, Tag};
use serde_json::Value;
use tracing::{debug, info};

/// IAM client for managing roles, managed policies and their attachments
#[derive(Clone)]
pub struct IamClient {
    client: Client,
}

impl FromAwsContext for IamClient {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.iam_client(),
        }
    }
}

fn iam_tags(records: &[TagRecord]) -> Result<Vec<Tag>, AwsError> {
    records
        .iter()
        .map(|r| {
            Tag::builder()
                .key(&r.key)
                .value(&r.value)
                .build()
                .map_err(invalid_request)
        })
        .collect()
}

fn tag_map_records(tags: &[Tag]) -> Vec<TagRecord> {
    tags.iter()
        .map(|t| TagRecord::new(t.key(), t.value()))
        .collect()
}

fn format_date(dt: &aws_sdk_iam::primitives::DateTime) -> Option<String> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).map(|d| d.to_rfc3339())
}

impl IamClient {
    // ── Roles ───────────────────────────────────────────────────────────

    /// Create a role. Returns the role name, which is its identifier.
    pub async fn create_role(&self, name: &str, payload: &ConfigMap) -> Result<String, AwsError> {
        info!(role = %name, "Creating IAM role");

        self.client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(required_str(payload, "AssumeRolePolicyDocument")?)
            .set_path(str_field(payload, "Path").map(str::to_string))
            .set_description(str_field(payload, "Description").map(str::to_string))
            .set_max_session_duration(int_field(payload, "MaxSessionDuration")?)
            .set_permissions_boundary(str_field(payload, "PermissionsBoundary").map(str::to_string))
            .set_tags(Some(iam_tags(&tag_records(payload)?)?))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        debug!(role = %name, "IAM role created");
        Ok(name.to_string())
    }

    pub async fn describe_role(&self, name: &str) -> Result<ConfigMap, AwsError> {
        let resp = self
            .client
            .get_role()
            .role_name(name)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let role = resp.role().ok_or_else(|| AwsError::NotFound {
            resource_type: "role",
            resource_id: name.to_string(),
        })?;

        let mut attrs = ConfigMap::new();
        attrs.insert("RoleName".into(), Value::from(role.role_name()));
        attrs.insert("RoleId".into(), Value::from(role.role_id()));
        attrs.insert("Arn".into(), Value::from(role.arn()));
        attrs.insert("Path".into(), Value::from(role.path()));
        if let Some(created) = format_date(role.create_date()) {
            attrs.insert("CreateDate".into(), Value::from(created));
        }
        if let Some(description) = role.description() {
            attrs.insert("Description".into(), Value::from(description));
        }
        if let Some(duration) = role.max_session_duration() {
            attrs.insert("MaxSessionDuration".into(), Value::from(duration));
        }
        if let Some(doc) = role.assume_role_policy_document() {
            attrs.insert(
                "AssumeRolePolicyDocument".into(),
                Value::from(decode_document(doc)),
            );
        }
        if let Some(arn) = role
            .permissions_boundary()
            .and_then(|b| b.permissions_boundary_arn())
        {
            attrs.insert("PermissionsBoundary".into(), Value::from(arn));
        }
        Ok(attrs)
    }

    pub async fn update_role(&self, name: &str, payload: &ConfigMap) -> Result<(), AwsError> {
        self.client
            .update_role()
            .role_name(name)
            .set_description(str_field(payload, "Description").map(str::to_string))
            .set_max_session_duration(int_field(payload, "MaxSessionDuration")?)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn update_assume_role_policy(
        &self,
        name: &str,
        payload: &ConfigMap,
    ) -> Result<(), AwsError> {
        self.client
            .update_assume_role_policy()
            .role_name(name)
            .policy_document(required_str(payload, "AssumeRolePolicyDocument")?)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn put_role_permissions_boundary(
        &self,
        name: &str,
        payload: &ConfigMap,
    ) -> Result<(), AwsError> {
        self.client
            .put_role_permissions_boundary()
            .role_name(name)
            .permissions_boundary(required_str(payload, "PermissionsBoundary")?)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    /// List roles - handle pagination for large accounts
    pub async fn list_roles(&self) -> Result<Vec<RawObject>, AwsError> {
        let mut roles = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_roles()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            roles.extend(
                resp.roles()
                    .iter()
                    .map(|r| RawObject::new(r.role_name(), r.role_name())),
            );

            if resp.is_truncated() {
                marker = resp.marker().map(|s| s.to_string());
            } else {
                break;
            }
        }

        debug!(count = roles.len(), "Listed IAM roles");
        Ok(roles)
    }

    pub async fn list_role_tags(&self, name: &str) -> Result<Vec<TagRecord>, AwsError> {
        let mut tags = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_role_tags()
                .role_name(name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            tags.extend(tag_map_records(resp.tags()));

            if resp.is_truncated() {
                marker = resp.marker().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(tags)
    }

    pub async fn tag_role(&self, name: &str, tags: &[TagRecord]) -> Result<(), AwsError> {
        self.client
            .tag_role()
            .role_name(name)
            .set_tags(Some(iam_tags(tags)?))
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn attach_role_policy(&self, name: &str, policy_arn: &str) -> Result<(), AwsError> {
        self.client
            .attach_role_policy()
            .role_name(name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn detach_role_policy(&self, name: &str, policy_arn: &str) -> Result<(), AwsError> {
        self.client
            .detach_role_policy()
            .role_name(name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    /// ARNs of managed policies attached to a role.
    ///
    /// Inline policies (`ListRolePolicies`) are not part of the attached set.
    pub async fn list_attached_role_policies(&self, name: &str) -> Result<Vec<String>, AwsError> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_attached_role_policies()
                .role_name(name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            arns.extend(
                resp.attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_string)),
            );

            if resp.is_truncated() {
                marker = resp.marker().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(arns)
    }

    pub async fn delete_role(&self, name: &str) -> Result<(), AwsError> {
        self.client
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        info!(role = %name, "IAM role deleted");
        Ok(())
    }

    // ── Managed policies ────────────────────────────────────────────────

    /// Create a managed policy. Returns its ARN.
    pub async fn create_policy(&self, name: &str, payload: &ConfigMap) -> Result<String, AwsError> {
        info!(policy = %name, "Creating IAM policy");

        let resp = self
            .client
            .create_policy()
            .policy_name(name)
            .policy_document(required_str(payload, "PolicyDocument")?)
            .set_path(str_field(payload, "Path").map(str::to_string))
            .set_description(str_field(payload, "Description").map(str::to_string))
            .set_tags(Some(iam_tags(&tag_records(payload)?)?))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let arn = resp
            .policy()
            .and_then(|p| p.arn())
            .ok_or_else(|| AwsError::Sdk {
                code: None,
                message: format!("CreatePolicy returned no ARN for '{name}'"),
            })?;

        debug!(policy = %name, arn = %arn, "IAM policy created");
        Ok(arn.to_string())
    }

    /// Describe a policy including the document of its default version
    pub async fn describe_policy(&self, arn: &str) -> Result<ConfigMap, AwsError> {
        let resp = self
            .client
            .get_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let policy = resp.policy().ok_or_else(|| AwsError::NotFound {
            resource_type: "policy",
            resource_id: arn.to_string(),
        })?;

        let mut attrs = ConfigMap::new();
        let fields = [
            ("PolicyName", policy.policy_name()),
            ("PolicyId", policy.policy_id()),
            ("Arn", policy.arn()),
            ("Path", policy.path()),
            ("Description", policy.description()),
            ("DefaultVersionId", policy.default_version_id()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                attrs.insert(key.into(), Value::from(value));
            }
        }

        if let Some(version_id) = policy.default_version_id() {
            let version = self
                .client
                .get_policy_version()
                .policy_arn(arn)
                .version_id(version_id)
                .send()
                .await
                .map_err(classify_sdk_error)?;
            if let Some(doc) = version.policy_version().and_then(|v| v.document()) {
                attrs.insert("PolicyDocument".into(), Value::from(decode_document(doc)));
            }
        }
        Ok(attrs)
    }

    /// Publish a new default version, pruning the oldest non-default
    /// version when IAM's version limit is reached.
    pub async fn create_policy_version(
        &self,
        arn: &str,
        payload: &ConfigMap,
    ) -> Result<(), AwsError> {
        let document = required_str(payload, "PolicyDocument")?;

        let versions = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        if versions.versions().len() >= MAX_POLICY_VERSIONS {
            let oldest = versions
                .versions()
                .iter()
                .filter(|v| !v.is_default_version())
                .min_by_key(|v| v.create_date().map(|d| (d.secs(), d.subsec_nanos())))
                .and_then(|v| v.version_id());
            if let Some(version_id) = oldest {
                debug!(policy = %arn, version = %version_id, "Pruning oldest policy version");
                self.delete_policy_version(arn, version_id).await?;
            }
        }

        self.client
            .create_policy_version()
            .policy_arn(arn)
            .policy_document(document)
            .set_as_default(true)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    async fn delete_policy_version(&self, arn: &str, version_id: &str) -> Result<(), AwsError> {
        self.client
            .delete_policy_version()
            .policy_arn(arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn list_policies(&self, scope: ListScope) -> Result<Vec<RawObject>, AwsError> {
        let scope = match scope {
            ListScope::All => PolicyScopeType::All,
            ListScope::CustomerManaged => PolicyScopeType::Local,
        };

        let mut policies = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_policies()
                .scope(scope.clone())
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            policies.extend(resp.policies().iter().filter_map(|p| {
                match (p.arn(), p.policy_name()) {
                    (Some(arn), Some(name)) => Some(RawObject::new(arn, name)),
                    _ => None,
                }
            }));

            if resp.is_truncated() {
                marker = resp.marker().map(|s| s.to_string());
            } else {
                break;
            }
        }

        debug!(count = policies.len(), "Listed IAM policies");
        Ok(policies)
    }

    pub async fn list_policy_tags(&self, arn: &str) -> Result<Vec<TagRecord>, AwsError> {
        let mut tags = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_policy_tags()
                .policy_arn(arn)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            tags.extend(tag_map_records(resp.tags()));

            if resp.is_truncated() {
                marker = resp.marker().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(tags)
    }

    pub async fn tag_policy(&self, arn: &str, tags: &[TagRecord]) -> Result<(), AwsError> {
        self.client
            .tag_policy()
            .policy_arn(arn)
            .set_tags(Some(iam_tags(tags)?))
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    /// Delete a policy; non-default versions must go first.
    pub async fn delete_policy(&self, arn: &str) -> Result<(), AwsError> {
        let versions = self
            .client
            .list_policy_versions()
            .policy_arn(arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        for version in versions.versions().iter().filter(|v| !v.is_default_version()) {
            if let Some(version_id) = version.version_id() {
                self.delete_policy_version(arn, version_id).await?;
            }
        }

        self.client
            .delete_policy()
            .policy_arn(arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        info!(policy = %arn, "IAM policy deleted");
        Ok(())
    }
}
