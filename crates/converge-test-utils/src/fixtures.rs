//! Desired-state fixtures shared by engine tests

use converge_common::tags::TAG_MANAGER;
use converge_common::{ConfigMap, TagMap};
use serde_json::{Value, json};

/// Trust policy letting EC2 assume a role
pub fn ec2_trust_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": "ec2.amazonaws.com"},
            "Action": "sts:AssumeRole"
        }]
    })
}

/// Policy document granting read access to one bucket
pub fn read_bucket_policy_document(bucket: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["s3:GetObject", "s3:ListBucket"],
            "Resource": [format!("arn:aws:s3:::{bucket}"), format!("arn:aws:s3:::{bucket}/*")]
        }]
    })
}

/// Bucket policy denying insecure transport, using the bucket placeholders
pub fn deny_insecure_transport_bucket_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "DenyInsecureTransport",
            "Effect": "Deny",
            "Principal": "*",
            "Action": "s3:*",
            "Resource": ["${BucketArn}", "${BucketArn}/*"],
            "Condition": {"Bool": {"aws:SecureTransport": "false"}}
        }]
    })
}

/// Unwrap a `json!` object literal into a config map
pub fn config(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture config must be a JSON object, got {other}"),
    }
}

/// Tag map carrying only an ownership tag for `manager`
pub fn owned_by(manager: &str) -> TagMap {
    [(TAG_MANAGER.to_string(), manager.to_string())].into()
}
