//! Desired-config processing
//!
//! Turns a caller's raw desired config into the shape the cloud API expects:
//! reserved tags merged in, JSON documents serialized to strings, and (for
//! creation) non-creation parameters stripped. Processing an already
//! processed config yields the same config.

use crate::descriptor::ResourceDescriptor;
use crate::error::ConvergeError;
use converge_common::resource_kind::{ATTACHED_POLICIES_KEY, TAGS_KEY};
use converge_common::tags::{from_records, merge_tags, standard_tags, to_records};
use converge_common::{ConfigMap, ResourceKind, TagMap, TagRecord};
use serde_json::Value;

/// Placeholders substituted in bucket policy documents
const BUCKET_NAME_PLACEHOLDER: &str = "${BucketName}";
const BUCKET_ARN_PLACEHOLDER: &str = "${BucketArn}";

#[derive(Debug, Clone)]
pub struct ConfigProcessor {
    manager: String,
}

impl ConfigProcessor {
    pub fn new(manager: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
        }
    }

    pub fn manager(&self) -> &str {
        &self.manager
    }

    /// Process a raw desired config for `descriptor`
    pub fn process(
        &self,
        raw: &ConfigMap,
        descriptor: &ResourceDescriptor,
    ) -> Result<ConfigMap, ConvergeError> {
        let kind = descriptor.kind();
        let mut processed = raw.clone();

        let user_tags = parse_tags(raw.get(TAGS_KEY))?;
        let standard = standard_tags(&self.manager, descriptor.stable_id().as_ref());
        let records = to_records(&merge_tags(&standard, &user_tags));
        processed.insert(TAGS_KEY.to_string(), tag_records_value(&records));

        for field in kind.document_fields() {
            let Some(value) = processed.get_mut(*field) else {
                continue;
            };
            serialize_document(field, value)?;
        }

        if kind == ResourceKind::Bucket
            && let Some(Value::String(policy)) = processed.get_mut("Policy")
        {
            let name = match descriptor.resolved_identifier() {
                Some(identifier) => identifier.to_string(),
                None => descriptor.creation_name()?,
            };
            *policy = substitute_bucket_placeholders(policy, &name);
        }

        // Validated here so a bad reference fails before any remote call
        if kind.member_kind().is_some() {
            attached_policies(&processed)?;
        }

        Ok(processed)
    }

    /// Payload for the create call: the processed config without the kind's
    /// non-creation parameters
    pub fn creation_payload(&self, kind: ResourceKind, processed: &ConfigMap) -> ConfigMap {
        processed
            .iter()
            .filter(|(k, _)| !kind.is_non_creation_parameter(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Tags of a processed config as a map
pub fn desired_tags(processed: &ConfigMap) -> Result<TagMap, ConvergeError> {
    parse_tags(processed.get(TAGS_KEY))
}

/// Policy references a role wants attached, if the config names any
pub fn attached_policies(processed: &ConfigMap) -> Result<Option<Vec<String>>, ConvergeError> {
    let Some(value) = processed.get(ATTACHED_POLICIES_KEY) else {
        return Ok(None);
    };
    let invalid = || {
        ConvergeError::InvalidDescriptor(format!(
            "{ATTACHED_POLICIES_KEY} must be a list of policy names or ARNs"
        ))
    };
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Accept tags as a `{key: value}` mapping or a list of `{Key, Value}` records
fn parse_tags(value: Option<&Value>) -> Result<TagMap, ConvergeError> {
    match value {
        None | Some(Value::Null) => Ok(TagMap::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                other => Err(ConvergeError::InvalidDescriptor(format!(
                    "tag '{k}' must have a string value, got {other}"
                ))),
            })
            .collect(),
        Some(value @ Value::Array(_)) => {
            let records: Vec<TagRecord> = serde_json::from_value(value.clone()).map_err(|e| {
                ConvergeError::InvalidDescriptor(format!("malformed tag records: {e}"))
            })?;
            Ok(from_records(&records))
        }
        Some(other) => Err(ConvergeError::InvalidDescriptor(format!(
            "{TAGS_KEY} must be a mapping or a list of records, got {other}"
        ))),
    }
}

fn tag_records_value(records: &[TagRecord]) -> Value {
    Value::Array(
        records
            .iter()
            .map(|r| serde_json::json!({"Key": r.key, "Value": r.value}))
            .collect(),
    )
}

/// Serialize a structured JSON document in place; strings are left untouched
fn serialize_document(field: &str, value: &mut Value) -> Result<(), ConvergeError> {
    match value {
        Value::String(_) => Ok(()),
        Value::Object(_) | Value::Array(_) => {
            *value = Value::String(value.to_string());
            Ok(())
        }
        other => Err(ConvergeError::InvalidDescriptor(format!(
            "{field} must be a JSON document or a string, got {other}"
        ))),
    }
}

fn substitute_bucket_placeholders(policy: &str, bucket: &str) -> String {
    policy
        .replace(BUCKET_ARN_PLACEHOLDER, &format!("arn:aws:s3:::{bucket}"))
        .replace(BUCKET_NAME_PLACEHOLDER, bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_common::tags::{TAG_MANAGER, TAG_STABLE_ID};
    use serde_json::json;
    use uuid::Uuid;

    fn config(value: Value) -> ConfigMap {
        value.as_object().unwrap().clone()
    }

    fn tags_of(processed: &ConfigMap) -> TagMap {
        desired_tags(processed).unwrap()
    }

    #[test]
    fn merges_standard_tags_over_user_tags() {
        let id = Uuid::new_v4();
        let d = ResourceDescriptor::named(ResourceKind::Role, "app").with_stable_id(id);
        let raw = config(json!({
            "Tags": {"team": "infra", "converge:manager": "someone-else"}
        }));
        let processed = ConfigProcessor::new("converge").process(&raw, &d).unwrap();

        let tags = tags_of(&processed);
        assert_eq!(tags["team"], "infra");
        assert_eq!(tags[TAG_MANAGER], "converge");
        assert_eq!(tags[TAG_STABLE_ID], id.to_string());
        assert!(processed["Tags"].is_array());
    }

    #[test]
    fn reserved_stable_id_is_dropped_without_descriptor_id() {
        let d = ResourceDescriptor::named(ResourceKind::Role, "app");
        let raw = config(json!({"Tags": {"converge:stable-id": "planted"}}));
        let processed = ConfigProcessor::new("converge").process(&raw, &d).unwrap();
        assert!(!tags_of(&processed).contains_key(TAG_STABLE_ID));
    }

    #[test]
    fn processing_is_idempotent() {
        let d = ResourceDescriptor::named(ResourceKind::Policy, "p").with_stable_id(Uuid::new_v4());
        let raw = config(json!({
            "PolicyDocument": {"Version": "2012-10-17", "Statement": []},
            "Tags": [{"Key": "env", "Value": "prod"}]
        }));
        let processor = ConfigProcessor::new("converge");
        let once = processor.process(&raw, &d).unwrap();
        let twice = processor.process(&once, &d).unwrap();
        assert_eq!(once, twice);
        assert!(once["PolicyDocument"].is_string());
    }

    #[test]
    fn document_strings_are_untouched() {
        let d = ResourceDescriptor::named(ResourceKind::Role, "app");
        let raw = config(json!({"AssumeRolePolicyDocument": "{ \"Version\": \"2012-10-17\" }"}));
        let processed = ConfigProcessor::new("converge").process(&raw, &d).unwrap();
        assert_eq!(
            processed["AssumeRolePolicyDocument"],
            "{ \"Version\": \"2012-10-17\" }"
        );
    }

    #[test]
    fn bucket_policy_placeholders_are_substituted() {
        let d = ResourceDescriptor::named(ResourceKind::Bucket, "logs");
        let raw = config(json!({
            "Policy": {"Statement": [{"Resource": ["${BucketArn}", "${BucketArn}/*"], "Sid": "${BucketName}"}]}
        }));
        let processed = ConfigProcessor::new("converge").process(&raw, &d).unwrap();
        let policy: Value = serde_json::from_str(processed["Policy"].as_str().unwrap()).unwrap();
        assert_eq!(
            policy["Statement"][0]["Resource"],
            json!(["arn:aws:s3:::logs", "arn:aws:s3:::logs/*"])
        );
        assert_eq!(policy["Statement"][0]["Sid"], "logs");
    }

    #[test]
    fn creation_payload_strips_non_creation_parameters() {
        let d = ResourceDescriptor::named(ResourceKind::Bucket, "logs");
        let raw = config(json!({"ACL": "private", "Policy": "{}", "Tags": {"a": "b"}}));
        let processor = ConfigProcessor::new("converge");
        let processed = processor.process(&raw, &d).unwrap();
        let payload = processor.creation_payload(ResourceKind::Bucket, &processed);
        assert_eq!(payload.keys().collect::<Vec<_>>(), vec!["ACL"]);

        let d = ResourceDescriptor::named(ResourceKind::Role, "app");
        let raw = config(json!({"Policies": ["ReadOnly"], "Description": "x"}));
        let processed = processor.process(&raw, &d).unwrap();
        let payload = processor.creation_payload(ResourceKind::Role, &processed);
        assert!(!payload.contains_key("Policies"));
        assert!(payload.contains_key("Tags"));
    }

    #[test]
    fn rejects_malformed_inputs() {
        let processor = ConfigProcessor::new("converge");
        let d = ResourceDescriptor::named(ResourceKind::Role, "app");
        for raw in [
            json!({"Tags": {"a": 1}}),
            json!({"Tags": "a=b"}),
            json!({"Policies": "ReadOnly"}),
            json!({"AssumeRolePolicyDocument": 42}),
        ] {
            assert!(matches!(
                processor.process(&config(raw), &d),
                Err(ConvergeError::InvalidDescriptor(_))
            ));
        }
    }
}
