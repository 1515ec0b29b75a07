//! Typed accessors over processed payload documents
//!
//! Payloads reaching the SDK layer are already processed: documents are
//! strings and tags are `{Key, Value}` records.

use converge_common::resource_kind::TAGS_KEY;
use converge_common::{AwsError, ConfigMap, TagRecord};
use serde_json::Value;

/// Optional string field
pub fn str_field<'a>(payload: &'a ConfigMap, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// String field the call cannot be issued without
pub fn required_str<'a>(payload: &'a ConfigMap, key: &str) -> Result<&'a str, AwsError> {
    str_field(payload, key)
        .ok_or_else(|| AwsError::InvalidRequest(format!("missing required string field '{key}'")))
}

/// Optional integer field, accepting a JSON number or a numeric string
pub fn int_field(payload: &ConfigMap, key: &str) -> Result<Option<i32>, AwsError> {
    let Some(value) = payload.get(key) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.parse::<i32>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| AwsError::InvalidRequest(format!("field '{key}' must be an integer")))
}

/// Tag records carried by a processed payload (empty when absent)
pub fn tag_records(payload: &ConfigMap) -> Result<Vec<TagRecord>, AwsError> {
    match payload.get(TAGS_KEY) {
        None => Ok(Vec::new()),
        Some(tags) => serde_json::from_value(tags.clone())
            .map_err(|e| AwsError::InvalidRequest(format!("malformed Tags: {e}"))),
    }
}

/// IAM returns policy documents URL-encoded; fall back to the raw text if
/// decoding fails.
pub fn decode_document(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
