//! Drift detection between desired and remote attributes

use converge_common::{ConfigMap, TagMap, UpdateCall};
use serde_json::Value;

/// What to do with one update call
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePlan {
    /// A required input is missing from the desired config
    MissingRequired(&'static str),
    /// The desired config does not mention any of the call's fields
    NotRequested,
    /// Every provided field already matches the remote value
    InSync,
    /// Issue the call with this payload
    Apply(ConfigMap),
}

/// Plan one update call against the described remote attributes
pub fn plan_update(call: &UpdateCall, desired: &ConfigMap, remote: &ConfigMap) -> UpdatePlan {
    if let Some(missing) = call.required.iter().find(|f| !desired.contains_key(**f)) {
        return UpdatePlan::MissingRequired(missing);
    }

    let payload: ConfigMap = call
        .fields()
        .filter_map(|f| desired.get(f).map(|v| (f.to_string(), v.clone())))
        .collect();
    if payload.is_empty() {
        return UpdatePlan::NotRequested;
    }

    if payload.iter().all(|(k, v)| values_match(v, remote.get(k))) {
        UpdatePlan::InSync
    } else {
        UpdatePlan::Apply(payload)
    }
}

/// Compare a desired value with a remote one.
///
/// Strings holding JSON documents compare by parsed value, and numbers
/// compare numerically even when one side is a numeric string.
pub fn values_match(desired: &Value, remote: Option<&Value>) -> bool {
    let Some(remote) = remote else {
        return false;
    };
    let (desired, remote) = (parse_document(desired), parse_document(remote));
    match (&desired, &remote) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => desired == remote,
    }
}

fn parse_document(value: &Value) -> Value {
    if let Value::String(s) = value
        && let Ok(parsed @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str(s)
    {
        return parsed;
    }
    value.clone()
}

/// Whether any desired tag is missing or different on the remote side.
/// Extra remote tags do not count as drift.
pub fn tags_drift(desired: &TagMap, remote: &TagMap) -> bool {
    desired.iter().any(|(k, v)| remote.get(k) != Some(v))
}
