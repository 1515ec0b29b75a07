//! Reserved tag keys and tag map conversion
//!
//! Every resource converged by this tool carries a small set of reserved tags
//! used for ownership arbitration and for rediscovering a resource after a
//! rename.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `converge:manager` | Identity of the managing engine (ownership) |
//! | `converge:stable-id` | Opaque UUID that survives renames (optional) |
//!
//! Remote APIs represent tags as a list of `{Key, Value}` records while the
//! engine works with a plain map. [`to_records`] and [`from_records`] convert
//! between the two without loss.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Tag key naming the engine instance that owns a resource
pub const TAG_MANAGER: &str = "converge:manager";

/// Tag key holding the stable identifier of a resource
pub const TAG_STABLE_ID: &str = "converge:stable-id";

/// Keys that user configuration may never override
pub const RESERVED_KEYS: &[&str] = &[TAG_MANAGER, TAG_STABLE_ID];

/// Logical tag map. Ordering carries no meaning; a `BTreeMap` keeps output stable.
pub type TagMap = BTreeMap<String, String>;

/// Remote representation of a single tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl TagRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Check whether a key is reserved for the engine
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Build the tags every managed resource must carry
pub fn standard_tags(manager: &str, stable_id: Option<&Uuid>) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(TAG_MANAGER.to_string(), manager.to_string());
    if let Some(id) = stable_id {
        tags.insert(TAG_STABLE_ID.to_string(), format_stable_id(id));
    }
    tags
}

/// Merge user tags with the standard tags.
///
/// User tags win for ordinary keys. Reserved keys always take the standard
/// value, and a reserved key without a standard value (no stable id) is
/// dropped so user config cannot plant one.
pub fn merge_tags(standard: &TagMap, user: &TagMap) -> TagMap {
    let mut merged: TagMap = user
        .iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(standard.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Convert a tag map into the list-of-records shape used by AWS APIs
pub fn to_records(tags: &TagMap) -> Vec<TagRecord> {
    tags.iter().map(|(k, v)| TagRecord::new(k, v)).collect()
}

/// Convert remote tag records back into a map
pub fn from_records(records: &[TagRecord]) -> TagMap {
    records
        .iter()
        .map(|r| (r.key.clone(), r.value.clone()))
        .collect()
}

/// Format a stable id the way it is stored in tags (hyphenated, lowercase)
pub fn format_stable_id(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

/// Parse a stable id tag value, ignoring malformed values
pub fn parse_stable_id(s: &str) -> Option<Uuid> {
    Uuid::parse_str(s).ok()
}

/// Owner recorded on a remote tag set, if any
pub fn owner(tags: &TagMap) -> Option<&str> {
    tags.get(TAG_MANAGER).map(String::as_str)
}
