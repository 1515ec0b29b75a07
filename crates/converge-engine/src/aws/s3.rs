//! S3 bucket management

use super::context::{AwsContext, FromAwsContext};
use super::error::{classify_sdk_error, invalid_request};
use super::payload::{required_str, str_field};
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{
    BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration, Tag, Tagging,
};
use chrono::DateTime;
use converge_common::{AwsError, ConfigMap, RawObject, TagRecord};
use serde_json::Value;
use tracing::{debug, info};

/// S3 client for managing converged buckets
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    region: String,
}

impl FromAwsContext for S3Client {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
        }
    }
}

/// Listed bucket with its creation date, if S3 reported one
struct ListedBucket {
    name: String,
    creation_date: Option<String>,
}

impl S3Client {
    /// Create a bucket in the client's region
    pub async fn create_bucket(&self, name: &str, payload: &ConfigMap) -> Result<String, AwsError> {
        info!(bucket = %name, region = %self.region, "Creating S3 bucket");

        let mut request = self
            .client
            .create_bucket()
            .bucket(name)
            .set_acl(str_field(payload, "ACL").map(BucketCannedAcl::from));

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            let create_config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            request = request.create_bucket_configuration(create_config);
        }

        request.send().await.map_err(classify_sdk_error)?;

        debug!(bucket = %name, "S3 bucket created");
        Ok(name.to_string())
    }

    async fn list_all(&self) -> Result<Vec<ListedBucket>, AwsError> {
        let mut buckets = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_buckets()
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            buckets.extend(resp.buckets().iter().filter_map(|b| {
                b.name().map(|name| ListedBucket {
                    name: name.to_string(),
                    creation_date: b
                        .creation_date()
                        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                        .map(|dt| dt.to_rfc3339()),
                })
            }));

            match resp.continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(buckets)
    }

    /// Bucket handle from the account listing. `HeadBucket` is not used: it
    /// answers for buckets in other accounts and lags after deletes.
    async fn find_listed(&self, name: &str) -> Result<ListedBucket, AwsError> {
        self.list_all()
            .await?
            .into_iter()
            .find(|b| b.name == name)
            .ok_or_else(|| AwsError::NotFound {
                resource_type: "bucket",
                resource_id: name.to_string(),
            })
    }

    /// Creation date of a listed bucket, without touching its policy
    pub async fn bucket_creation_date(&self, name: &str) -> Result<Option<String>, AwsError> {
        Ok(self.find_listed(name).await?.creation_date)
    }

    /// Describe a bucket from the account listing plus its policy
    pub async fn describe_bucket(&self, name: &str) -> Result<ConfigMap, AwsError> {
        let listed = self.find_listed(name).await?;

        let mut attrs = ConfigMap::new();
        attrs.insert("Bucket".into(), Value::from(listed.name));
        if let Some(created) = listed.creation_date {
            attrs.insert("CreationDate".into(), Value::from(created));
        }

        match self.client.get_bucket_policy().bucket(name).send().await {
            Ok(resp) => {
                if let Some(policy) = resp.policy() {
                    attrs.insert("Policy".into(), Value::from(policy));
                }
            }
            Err(e) => match classify_sdk_error(e) {
                AwsError::NoBucketPolicy => {}
                other => return Err(other),
            },
        }
        Ok(attrs)
    }

    pub async fn put_bucket_policy(&self, name: &str, payload: &ConfigMap) -> Result<(), AwsError> {
        self.client
            .put_bucket_policy()
            .bucket(name)
            .policy(required_str(payload, "Policy")?)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    pub async fn list_buckets(&self) -> Result<Vec<RawObject>, AwsError> {
        let buckets: Vec<RawObject> = self
            .list_all()
            .await?
            .into_iter()
            .map(|b| RawObject::new(&b.name, &b.name))
            .collect();
        debug!(count = buckets.len(), "Listed S3 buckets");
        Ok(buckets)
    }

    pub async fn get_bucket_tagging(&self, name: &str) -> Result<Vec<TagRecord>, AwsError> {
        let resp = self
            .client
            .get_bucket_tagging()
            .bucket(name)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(resp
            .tag_set()
            .iter()
            .map(|t| TagRecord::new(t.key(), t.value()))
            .collect())
    }

    /// Replace the bucket's tag set
    pub async fn put_bucket_tagging(&self, name: &str, tags: &[TagRecord]) -> Result<(), AwsError> {
        let tag_set = tags
            .iter()
            .map(|r| {
                Tag::builder()
                    .key(&r.key)
                    .value(&r.value)
                    .build()
                    .map_err(invalid_request)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(invalid_request)?;

        self.client
            .put_bucket_tagging()
            .bucket(name)
            .tagging(tagging)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    /// Delete a bucket and all its objects
    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), AwsError> {
        info!(bucket = %bucket, "Deleting bucket and contents");

        // List and delete all objects
        let mut continuation_token = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    debug!(key = %key, "Deleting object");
                    self.client
                        .delete_object()
                        .bucket(bucket)
                        .key(key)
                        .send()
                        .await
                        .map_err(classify_sdk_error)?;
                }
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        info!(bucket = %bucket, "S3 bucket deleted");
        Ok(())
    }
}
