//! AWS error classification
//!
//! Cloud API clients map SDK failures onto [`AwsError`] by service error
//! code, never by matching on Debug output. The engine only branches on the
//! classified variants; anything it does not recognize stays an
//! [`AwsError::Sdk`] and is passed through.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AwsError {
    /// The object does not exist, or vanished between two calls
    #[error("{resource_type} '{resource_id}' does not exist")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// The object exists but has never been tagged (S3 only)
    #[error("no tag set")]
    NoTagSet,

    /// The bucket exists but has no bucket policy
    #[error("no bucket policy")]
    NoBucketPolicy,

    #[error("already exists")]
    AlreadyExists,

    #[error("request throttled")]
    Throttled,

    /// Deleting would orphan dependents (attached policies, bucket objects)
    #[error("object still has dependents")]
    DependencyViolation,

    #[error("{operation} is not supported for {kind}")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },

    /// The payload could not be turned into a request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unclassified service or transport failure
    #[error("{}: {message}", .code.as_deref().unwrap_or("AWS error"))]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_no_tag_set(&self) -> bool {
        matches!(self, AwsError::NoTagSet)
    }

    /// Conditions the bulk lister skips: the object vanished or carries no tags
    pub fn is_expected_listing_churn(&self) -> bool {
        self.is_not_found() || self.is_no_tag_set()
    }

    /// Service error code of an unclassified failure
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Sdk { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// IAM and S3 codes for a missing object
const MISSING_OBJECT_CODES: &[&str] = &["NoSuchEntity", "NoSuchBucket", "NoSuchKey", "NotFound", "404"];

/// Map a service error code and message onto an [`AwsError`]
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("no error message").to_string();
    let Some(code) = code else {
        return AwsError::Sdk {
            code: None,
            message,
        };
    };

    match code {
        c if MISSING_OBJECT_CODES.contains(&c) => AwsError::NotFound {
            resource_type: "resource",
            resource_id: message,
        },
        "NoSuchTagSet" | "NoSuchTagSetError" => AwsError::NoTagSet,
        "NoSuchBucketPolicy" => AwsError::NoBucketPolicy,
        "EntityAlreadyExists" | "BucketAlreadyOwnedByYou" | "BucketAlreadyExists" => {
            AwsError::AlreadyExists
        }
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded" | "SlowDown" => {
            AwsError::Throttled
        }
        "DeleteConflict" | "BucketNotEmpty" => AwsError::DependencyViolation,
        other => AwsError::Sdk {
            code: Some(other.to_string()),
            message,
        },
    }
}
