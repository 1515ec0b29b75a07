//! Boundary between the convergence engine and the remote cloud.
//!
//! The engine never talks to an SDK directly; it is handed a [`CloudApi`]
//! value (and a [`Waiter`]) at construction time. The production
//! implementation wraps the AWS SDK; tests use an in-memory fake.

use crate::error::AwsError;
use crate::resource_kind::ResourceKind;
use crate::tags::TagRecord;
use std::future::Future;

/// Attribute name -> value document, used both for desired config and for
/// described remote attributes.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Which remote objects a listing call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    /// Everything visible to the account, including AWS-managed objects
    All,
    /// Only objects owned by the account
    CustomerManaged,
}

/// A remote object as returned by a listing call, before tag hydration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    /// Remote identifier (ARN for policies, name otherwise)
    pub identifier: String,
    /// Human-readable name
    pub name: String,
}

impl RawObject {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
        }
    }
}

/// Remote operations the engine needs, per resource kind.
///
/// Implementations must report a missing object as [`AwsError::NotFound`]
/// and a missing tag set as [`AwsError::NoTagSet`]; every other failure is
/// passed through unchanged by the engine.
pub trait CloudApi: Send + Sync {
    /// Create a resource from a processed creation payload.
    /// Returns the remote identifier of the new resource.
    fn create(
        &self,
        kind: ResourceKind,
        name: &str,
        payload: &ConfigMap,
    ) -> impl Future<Output = Result<String, AwsError>> + Send;

    /// Describe a resource's current attributes
    fn describe(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> impl Future<Output = Result<ConfigMap, AwsError>> + Send;

    /// Creation timestamp carried by the resource's remote handle.
    ///
    /// Reads only the handle itself, never sub-resources such as a bucket
    /// policy. A missing object is [`AwsError::NotFound`].
    fn creation_date(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> impl Future<Output = Result<Option<String>, AwsError>> + Send;

    /// Issue one of the kind's declared update calls
    fn update(
        &self,
        kind: ResourceKind,
        call: &str,
        identifier: &str,
        payload: &ConfigMap,
    ) -> impl Future<Output = Result<(), AwsError>> + Send;

    /// List all remote objects of a kind, following pagination
    fn list(
        &self,
        kind: ResourceKind,
        scope: ListScope,
    ) -> impl Future<Output = Result<Vec<RawObject>, AwsError>> + Send;

    /// Fetch the raw tag records of a resource
    fn get_tags(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> impl Future<Output = Result<Vec<TagRecord>, AwsError>> + Send;

    /// Write tag records to a resource
    fn set_tags(
        &self,
        kind: ResourceKind,
        identifier: &str,
        tags: &[TagRecord],
    ) -> impl Future<Output = Result<(), AwsError>> + Send;

    /// Attach a member (policy ARN) to a parent resource
    fn attach(
        &self,
        kind: ResourceKind,
        parent: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), AwsError>> + Send;

    /// Detach a member from a parent resource
    fn detach(
        &self,
        kind: ResourceKind,
        parent: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), AwsError>> + Send;

    /// List the canonical identifiers of members attached to a parent
    fn list_attached(
        &self,
        kind: ResourceKind,
        parent: &str,
    ) -> impl Future<Output = Result<Vec<String>, AwsError>> + Send;

    /// Delete a resource. Dependent state (bucket objects, policy versions)
    /// is the implementation's concern; attachments are detached by the engine.
    fn delete(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> impl Future<Output = Result<(), AwsError>> + Send;
}

/// Blocking poll until a resource becomes visible (or disappears).
///
/// Implementations own the retry, backoff and timeout policy.
pub trait Waiter: Send + Sync {
    fn wait_until_exists(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn wait_until_not_exists(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}
