//! In-memory cloud for engine tests
//!
//! [`FakeCloud`] keeps IAM roles, IAM policies and S3 buckets in insertion
//! order and records every mutating call, so tests can assert both on the
//! resulting state and on exactly which writes the engine issued. Failures
//! can be injected per operation and target.

use converge_common::tags::{from_records, to_records};
use converge_common::{
    AwsError, CloudApi, ConfigMap, ListScope, RawObject, ResourceKind, TagMap, TagRecord, Waiter,
    classify_aws_error,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Account id used in fake ARNs
pub const FAKE_ACCOUNT_ID: &str = "123456789012";

/// A mutating call issued against the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { kind: ResourceKind, name: String },
    Update { kind: ResourceKind, call: String, identifier: String },
    SetTags { kind: ResourceKind, identifier: String },
    Attach { kind: ResourceKind, parent: String, member: String },
    Detach { kind: ResourceKind, parent: String, member: String },
    Delete { kind: ResourceKind, identifier: String },
}

/// Operation a failure can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Create,
    Describe,
    CreationDate,
    Update,
    GetTags,
    SetTags,
    Attach,
    Detach,
    ListAttached,
    Delete,
}

#[derive(Debug, Clone)]
struct Failure {
    op: FailOn,
    target: String,
    code: String,
}

#[derive(Debug, Clone)]
struct FakeObject {
    kind: ResourceKind,
    identifier: String,
    name: String,
    attributes: ConfigMap,
    /// `None` until tags are first written
    tags: Option<TagMap>,
    attached: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    objects: Vec<FakeObject>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
}

impl State {
    fn find(&self, kind: ResourceKind, identifier: &str) -> Option<&FakeObject> {
        self.objects
            .iter()
            .find(|o| o.kind == kind && o.identifier == identifier)
    }

    fn find_mut(&mut self, kind: ResourceKind, identifier: &str) -> Result<&mut FakeObject, AwsError> {
        self.objects
            .iter_mut()
            .find(|o| o.kind == kind && o.identifier == identifier)
            .ok_or_else(|| not_found(kind, identifier))
    }

    fn check(&self, op: FailOn, target: &str) -> Result<(), AwsError> {
        match self.failures.iter().find(|f| f.op == op && f.target == target) {
            Some(f) => Err(classify_aws_error(
                Some(&f.code),
                Some(&format!("injected {op:?} failure for {target}")),
            )),
            None => Ok(()),
        }
    }
}

fn not_found(kind: ResourceKind, identifier: &str) -> AwsError {
    AwsError::NotFound {
        resource_type: kind.as_str(),
        resource_id: identifier.to_string(),
    }
}

/// In-memory implementation of [`CloudApi`]
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<State>,
    tag_reads: AtomicUsize,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Identifier the fake assigns to a resource named `name`
    pub fn identifier_for(kind: ResourceKind, name: &str, attributes: &ConfigMap) -> String {
        match kind {
            ResourceKind::Role | ResourceKind::Bucket => name.to_string(),
            ResourceKind::Policy => {
                let path = attributes.get("Path").and_then(Value::as_str).unwrap_or("/");
                format!("arn:aws:iam::{FAKE_ACCOUNT_ID}:policy{path}{name}")
            }
        }
    }

    fn insert(
        &self,
        kind: ResourceKind,
        identifier: String,
        name: &str,
        mut attributes: ConfigMap,
        tags: Option<TagMap>,
    ) {
        attributes.insert(kind.name_key().to_string(), Value::from(name));
        match kind {
            ResourceKind::Role => {
                attributes.insert(
                    "Arn".into(),
                    Value::from(format!("arn:aws:iam::{FAKE_ACCOUNT_ID}:role/{name}")),
                );
            }
            ResourceKind::Policy => {
                attributes.insert("Arn".into(), Value::from(identifier.as_str()));
            }
            ResourceKind::Bucket => {
                attributes.insert(
                    "CreationDate".into(),
                    Value::from(chrono::Utc::now().to_rfc3339()),
                );
            }
        }
        self.state().objects.push(FakeObject {
            kind,
            identifier,
            name: name.to_string(),
            attributes,
            tags,
            attached: Vec::new(),
        });
    }

    /// Seed a resource without recording a call. Returns its identifier.
    pub fn seed(&self, kind: ResourceKind, name: &str, tags: Option<TagMap>) -> String {
        self.seed_with(kind, name, ConfigMap::new(), tags)
    }

    /// Seed a resource with explicit attributes
    pub fn seed_with(
        &self,
        kind: ResourceKind,
        name: &str,
        attributes: ConfigMap,
        tags: Option<TagMap>,
    ) -> String {
        let identifier = Self::identifier_for(kind, name, &attributes);
        self.insert(kind, identifier.clone(), name, attributes, tags);
        identifier
    }

    /// Seed an AWS-managed policy (outside the customer-managed scope)
    pub fn seed_aws_managed_policy(&self, name: &str) -> String {
        let identifier = format!("arn:aws:iam::aws:policy/{name}");
        self.insert(ResourceKind::Policy, identifier.clone(), name, ConfigMap::new(), None);
        identifier
    }

    /// Attach `member` to `parent` without recording a call
    pub fn seed_attachment(&self, kind: ResourceKind, parent: &str, member: &str) {
        if let Ok(object) = self.state().find_mut(kind, parent) {
            object.attached.push(member.to_string());
        }
    }

    /// Make every `op` on `target` fail with the given AWS error code.
    /// For attach and detach, `target` is the member.
    pub fn fail(&self, op: FailOn, target: &str, code: &str) {
        self.state().failures.push(Failure {
            op,
            target: target.to_string(),
            code: code.to_string(),
        });
    }

    /// Remove all injected failures
    pub fn heal(&self) {
        self.state().failures.clear();
    }

    /// Mutating calls issued so far, in order
    pub fn mutations(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().calls.clear();
    }

    /// Number of tag reads served
    pub fn tag_reads(&self) -> usize {
        self.tag_reads.load(Ordering::SeqCst)
    }

    pub fn contains(&self, kind: ResourceKind, identifier: &str) -> bool {
        self.state().find(kind, identifier).is_some()
    }

    pub fn tags(&self, kind: ResourceKind, identifier: &str) -> Option<TagMap> {
        self.state().find(kind, identifier).and_then(|o| o.tags.clone())
    }

    pub fn attributes(&self, kind: ResourceKind, identifier: &str) -> Option<ConfigMap> {
        self.state().find(kind, identifier).map(|o| o.attributes.clone())
    }

    pub fn attached(&self, kind: ResourceKind, parent: &str) -> Vec<String> {
        self.state()
            .find(kind, parent)
            .map(|o| o.attached.clone())
            .unwrap_or_default()
    }
}

fn is_aws_managed(identifier: &str) -> bool {
    identifier.starts_with("arn:aws:iam::aws:")
}

impl CloudApi for FakeCloud {
    async fn create(&self, kind: ResourceKind, name: &str, payload: &ConfigMap) -> Result<String, AwsError> {
        let identifier = Self::identifier_for(kind, name, payload);
        {
            let mut state = self.state();
            state.check(FailOn::Create, name)?;
            if state.find(kind, &identifier).is_some() {
                return Err(AwsError::AlreadyExists);
            }
            state.calls.push(Call::Create {
                kind,
                name: name.to_string(),
            });
        }

        let mut attributes = payload.clone();
        let tags = match attributes.remove("Tags") {
            Some(value) => {
                let records: Vec<TagRecord> = serde_json::from_value(value)
                    .map_err(|e| AwsError::InvalidRequest(e.to_string()))?;
                Some(from_records(&records))
            }
            None => None,
        };
        self.insert(kind, identifier.clone(), name, attributes, tags);
        Ok(identifier)
    }

    async fn describe(&self, kind: ResourceKind, identifier: &str) -> Result<ConfigMap, AwsError> {
        let state = self.state();
        state.check(FailOn::Describe, identifier)?;
        state
            .find(kind, identifier)
            .map(|o| o.attributes.clone())
            .ok_or_else(|| not_found(kind, identifier))
    }

    async fn creation_date(&self, kind: ResourceKind, identifier: &str) -> Result<Option<String>, AwsError> {
        let state = self.state();
        state.check(FailOn::CreationDate, identifier)?;
        let object = state
            .find(kind, identifier)
            .ok_or_else(|| not_found(kind, identifier))?;
        Ok(["CreationDate", "CreateDate"]
            .into_iter()
            .find_map(|key| object.attributes.get(key))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        call: &str,
        identifier: &str,
        payload: &ConfigMap,
    ) -> Result<(), AwsError> {
        let update_call = kind
            .update_call(call)
            .ok_or_else(|| AwsError::InvalidRequest(format!("unknown update call '{call}' for {kind}")))?;
        let mut state = self.state();
        state.check(FailOn::Update, identifier)?;
        let object = state.find_mut(kind, identifier)?;
        for field in update_call.fields() {
            if let Some(value) = payload.get(field) {
                object.attributes.insert(field.to_string(), value.clone());
            }
        }
        state.calls.push(Call::Update {
            kind,
            call: call.to_string(),
            identifier: identifier.to_string(),
        });
        Ok(())
    }

    async fn list(&self, kind: ResourceKind, scope: ListScope) -> Result<Vec<RawObject>, AwsError> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .filter(|o| scope == ListScope::All || !is_aws_managed(&o.identifier))
            .map(|o| RawObject::new(&o.identifier, &o.name))
            .collect())
    }

    async fn get_tags(&self, kind: ResourceKind, identifier: &str) -> Result<Vec<TagRecord>, AwsError> {
        self.tag_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        state.check(FailOn::GetTags, identifier)?;
        let object = state
            .find(kind, identifier)
            .ok_or_else(|| not_found(kind, identifier))?;
        match (&object.tags, kind) {
            (Some(tags), _) => Ok(to_records(tags)),
            (None, ResourceKind::Bucket) => Err(AwsError::NoTagSet),
            (None, _) => Ok(Vec::new()),
        }
    }

    async fn set_tags(&self, kind: ResourceKind, identifier: &str, tags: &[TagRecord]) -> Result<(), AwsError> {
        let mut state = self.state();
        state.check(FailOn::SetTags, identifier)?;
        let object = state.find_mut(kind, identifier)?;
        let incoming = from_records(tags);
        object.tags = match (kind, object.tags.take()) {
            // S3 replaces the whole tag set; IAM adds and overwrites
            (ResourceKind::Bucket, _) | (_, None) => Some(incoming),
            (_, Some(mut existing)) => {
                existing.extend(incoming);
                Some(existing)
            }
        };
        state.calls.push(Call::SetTags {
            kind,
            identifier: identifier.to_string(),
        });
        Ok(())
    }

    async fn attach(&self, kind: ResourceKind, parent: &str, member: &str) -> Result<(), AwsError> {
        let member_kind = kind.member_kind().ok_or(AwsError::Unsupported {
            operation: "attach",
            kind: kind.as_str(),
        })?;
        let mut state = self.state();
        state.check(FailOn::Attach, member)?;
        if state.find(member_kind, member).is_none() {
            return Err(not_found(member_kind, member));
        }
        let object = state.find_mut(kind, parent)?;
        if !object.attached.iter().any(|m| m == member) {
            object.attached.push(member.to_string());
        }
        state.calls.push(Call::Attach {
            kind,
            parent: parent.to_string(),
            member: member.to_string(),
        });
        Ok(())
    }

    async fn detach(&self, kind: ResourceKind, parent: &str, member: &str) -> Result<(), AwsError> {
        let member_kind = kind.member_kind().ok_or(AwsError::Unsupported {
            operation: "detach",
            kind: kind.as_str(),
        })?;
        let mut state = self.state();
        state.check(FailOn::Detach, member)?;
        let object = state.find_mut(kind, parent)?;
        let before = object.attached.len();
        object.attached.retain(|m| m != member);
        if object.attached.len() == before {
            return Err(not_found(member_kind, member));
        }
        state.calls.push(Call::Detach {
            kind,
            parent: parent.to_string(),
            member: member.to_string(),
        });
        Ok(())
    }

    async fn list_attached(&self, kind: ResourceKind, parent: &str) -> Result<Vec<String>, AwsError> {
        if kind.member_kind().is_none() {
            return Err(AwsError::Unsupported {
                operation: "list_attached",
                kind: kind.as_str(),
            });
        }
        let state = self.state();
        state.check(FailOn::ListAttached, parent)?;
        state
            .find(kind, parent)
            .map(|o| o.attached.clone())
            .ok_or_else(|| not_found(kind, parent))
    }

    async fn delete(&self, kind: ResourceKind, identifier: &str) -> Result<(), AwsError> {
        let mut state = self.state();
        state.check(FailOn::Delete, identifier)?;
        let index = state
            .objects
            .iter()
            .position(|o| o.kind == kind && o.identifier == identifier)
            .ok_or_else(|| not_found(kind, identifier))?;
        if !state.objects[index].attached.is_empty() {
            return Err(AwsError::DependencyViolation);
        }
        state.objects.remove(index);
        state.calls.push(Call::Delete {
            kind,
            identifier: identifier.to_string(),
        });
        Ok(())
    }
}

/// Waiter that returns immediately, optionally failing, and counts waits
#[derive(Debug, Default)]
pub struct FakeWaiter {
    fail_with: Option<String>,
    waits: AtomicUsize,
}

impl FakeWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A waiter whose every wait fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            waits: AtomicUsize::new(0),
        }
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }

    fn wait(&self) -> anyhow::Result<()> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(reason) => Err(anyhow::anyhow!("{reason}")),
            None => Ok(()),
        }
    }
}

impl Waiter for FakeWaiter {
    async fn wait_until_exists(&self, _kind: ResourceKind, _identifier: &str) -> anyhow::Result<()> {
        self.wait()
    }

    async fn wait_until_not_exists(&self, _kind: ResourceKind, _identifier: &str) -> anyhow::Result<()> {
        self.wait()
    }
}
