//! Default configuration values shared by the engine and its binary
//!
//! These constants keep library defaults and CLI defaults in sync.

/// Default manager identity written to the ownership tag
pub const DEFAULT_MANAGER: &str = "converge";

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of concurrent tag fetches during bulk listing
pub const DEFAULT_LIST_CONCURRENCY: usize = 8;

/// Default timeout in seconds for existence waits
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;

/// Maximum number of versions IAM keeps per managed policy
pub const MAX_POLICY_VERSIONS: usize = 5;

// Serde default functions for struct field defaults

/// Returns the default manager identity
pub fn default_manager() -> String {
    DEFAULT_MANAGER.to_string()
}
