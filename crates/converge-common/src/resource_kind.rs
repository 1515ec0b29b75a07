//! Managed resource kinds and their per-kind tables
//!
//! Each kind supplies only what differs from the generic convergence flow:
//! how a name maps to a remote identifier, how existence is probed, which
//! fields cannot be passed at creation time, and which update calls exist.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Types of AWS resources managed by converge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// IAM role, identified by its name
    Role,
    /// IAM managed policy, identified by its ARN
    Policy,
    /// S3 bucket, identified by its name
    Bucket,
}

/// How a human-readable name maps to the remote identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityConvention {
    /// The name is the identifier
    NameIsIdentifier,
    /// The identifier must be looked up by listing and matching the name
    LookupByName,
}

/// How the existence oracle decides whether a resolved resource exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceProbe {
    /// Describe the resource; a not-found error means absent
    Describe,
    /// Fetch the resource handle and check that it carries a creation date.
    ///
    /// Used for buckets: the head-request check AWS recommends reports
    /// spurious results, so the account listing is consulted instead.
    CreationDate,
}

/// A statically declared update call for one kind.
///
/// The call is issued only when every `required` field is present in the
/// processed config and at least one of its fields differs from the remote
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCall {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

impl UpdateCall {
    /// All config fields this call consumes
    pub fn fields(&self) -> impl Iterator<Item = &'static str> {
        self.required.iter().chain(self.optional.iter()).copied()
    }
}

const ROLE_UPDATE_CALLS: &[UpdateCall] = &[
    UpdateCall {
        name: "UpdateRole",
        required: &[],
        optional: &["Description", "MaxSessionDuration"],
    },
    UpdateCall {
        name: "UpdateAssumeRolePolicy",
        required: &["AssumeRolePolicyDocument"],
        optional: &[],
    },
    UpdateCall {
        name: "PutRolePermissionsBoundary",
        required: &["PermissionsBoundary"],
        optional: &[],
    },
];

const POLICY_UPDATE_CALLS: &[UpdateCall] = &[UpdateCall {
    name: "CreatePolicyVersion",
    required: &["PolicyDocument"],
    optional: &[],
}];

const BUCKET_UPDATE_CALLS: &[UpdateCall] = &[UpdateCall {
    name: "PutBucketPolicy",
    required: &["Policy"],
    optional: &[],
}];

/// Config key holding the policy references attached to a role
pub const ATTACHED_POLICIES_KEY: &str = "Policies";

/// Config key holding tags
pub const TAGS_KEY: &str = "Tags";

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Role, ResourceKind::Policy, ResourceKind::Bucket];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Role => "role",
            ResourceKind::Policy => "policy",
            ResourceKind::Bucket => "bucket",
        }
    }

    /// Config/API field carrying the resource name
    pub fn name_key(self) -> &'static str {
        match self {
            ResourceKind::Role => "RoleName",
            ResourceKind::Policy => "PolicyName",
            ResourceKind::Bucket => "Bucket",
        }
    }

    pub fn identity_convention(self) -> IdentityConvention {
        match self {
            ResourceKind::Role | ResourceKind::Bucket => IdentityConvention::NameIsIdentifier,
            ResourceKind::Policy => IdentityConvention::LookupByName,
        }
    }

    pub fn existence_probe(self) -> ExistenceProbe {
        match self {
            ResourceKind::Role | ResourceKind::Policy => ExistenceProbe::Describe,
            ResourceKind::Bucket => ExistenceProbe::CreationDate,
        }
    }

    /// Fields only meaningful after creation; stripped from the create payload
    pub fn non_creation_parameters(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Role => &[ATTACHED_POLICIES_KEY],
            ResourceKind::Policy => &[],
            ResourceKind::Bucket => &["Policy", TAGS_KEY],
        }
    }

    pub fn is_non_creation_parameter(self, key: &str) -> bool {
        self.non_creation_parameters().contains(&key)
    }

    pub fn update_calls(self) -> &'static [UpdateCall] {
        match self {
            ResourceKind::Role => ROLE_UPDATE_CALLS,
            ResourceKind::Policy => POLICY_UPDATE_CALLS,
            ResourceKind::Bucket => BUCKET_UPDATE_CALLS,
        }
    }

    pub fn update_call(self, name: &str) -> Option<&'static UpdateCall> {
        self.update_calls().iter().find(|c| c.name == name)
    }

    /// JSON document fields sent to AWS as strings
    pub fn document_fields(self) -> &'static [&'static str] {
        match self {
            ResourceKind::Role => &["AssumeRolePolicyDocument"],
            ResourceKind::Policy => &["PolicyDocument"],
            ResourceKind::Bucket => &["Policy"],
        }
    }

    /// Kind of the members in this kind's attached sub-resource set, if any
    pub fn member_kind(self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Role => Some(ResourceKind::Policy),
            ResourceKind::Policy | ResourceKind::Bucket => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "role" | "iam-role" => Ok(ResourceKind::Role),
            "policy" | "iam-policy" => Ok(ResourceKind::Policy),
            "bucket" | "s3-bucket" => Ok(ResourceKind::Bucket),
            other => Err(format!("unknown resource kind '{other}'")),
        }
    }
}
