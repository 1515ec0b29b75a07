//! Helpers for the live AWS tests
//!
//! Live tests create real roles and buckets, so every name they use must be
//! unique per run and valid for S3.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Region for live tests: `AWS_REGION`, then `AWS_DEFAULT_REGION`, then us-east-1
pub fn get_test_region() -> String {
    ["AWS_REGION", "AWS_DEFAULT_REGION"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "us-east-1".to_string())
}

/// Per-process unique suffix: millisecond timestamp plus a counter, so
/// tests starting in the same millisecond still differ.
///
/// ```
/// use converge_test_utils::aws::test_run_id;
///
/// assert_ne!(test_run_id(), test_run_id());
/// ```
pub fn test_run_id() -> String {
    static SEQUENCE: AtomicU32 = AtomicU32::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{seq}", Utc::now().timestamp_millis())
}

/// Unique, S3-compatible name for a live test resource.
///
/// ```
/// use converge_test_utils::aws::test_resource_name;
///
/// let bucket = test_resource_name("bucket");
/// assert!(bucket.starts_with("converge-bucket-test-"));
/// ```
pub fn test_resource_name(prefix: &str) -> String {
    format!("converge-{prefix}-{}", test_run_id())
}
