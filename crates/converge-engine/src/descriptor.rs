//! Resource descriptors
//!
//! A [`ResourceDescriptor`] is the engine's handle on one remote resource:
//! the desired state, whatever identity keys the caller knows, and the
//! identifier the engine resolved for it. Resolution is cached on the
//! descriptor, so a descriptor is owned by one caller at a time.

use crate::error::ConvergeError;
use converge_common::tags::{TAG_STABLE_ID, parse_stable_id};
use converge_common::{ConfigMap, RawObject, ResourceKind, TagMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the engine last learned about remote existence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Existence {
    #[default]
    Unknown,
    Present,
    Absent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    kind: ResourceKind,
    name: Option<String>,
    stable_id: Option<Uuid>,
    resolved_identifier: Option<String>,
    desired_config: ConfigMap,
    exists: Existence,
    region: Option<String>,
    /// Remote tags, populated only for descriptors produced by a listing
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_tags: Option<TagMap>,
}

impl ResourceDescriptor {
    fn empty(kind: ResourceKind) -> Self {
        Self {
            kind,
            name: None,
            stable_id: None,
            resolved_identifier: None,
            desired_config: ConfigMap::new(),
            exists: Existence::Unknown,
            region: None,
            remote_tags: None,
        }
    }

    /// Descriptor keyed by a human-readable name
    pub fn named(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::empty(kind)
        }
    }

    /// Descriptor keyed only by a stable id
    pub fn by_stable_id(kind: ResourceKind, stable_id: Uuid) -> Self {
        Self {
            stable_id: Some(stable_id),
            ..Self::empty(kind)
        }
    }

    /// Descriptor for an already-known remote identifier
    pub fn from_identifier(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            resolved_identifier: Some(identifier.into()),
            ..Self::empty(kind)
        }
    }

    /// Descriptor for an object found by a listing, with its remote tags
    pub(crate) fn discovered(
        kind: ResourceKind,
        object: RawObject,
        tags: TagMap,
        region: Option<String>,
    ) -> Self {
        Self {
            name: Some(object.name),
            stable_id: tags.get(TAG_STABLE_ID).and_then(|v| parse_stable_id(v)),
            resolved_identifier: Some(object.identifier),
            exists: Existence::Present,
            region,
            remote_tags: Some(tags),
            ..Self::empty(kind)
        }
    }

    pub fn with_stable_id(mut self, stable_id: Uuid) -> Self {
        self.stable_id = Some(stable_id);
        self
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.desired_config = config;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn stable_id(&self) -> Option<Uuid> {
        self.stable_id
    }

    pub fn resolved_identifier(&self) -> Option<&str> {
        self.resolved_identifier.as_deref()
    }

    pub fn desired_config(&self) -> &ConfigMap {
        &self.desired_config
    }

    pub fn exists(&self) -> Existence {
        self.exists
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn remote_tags(&self) -> Option<&TagMap> {
        self.remote_tags.as_ref()
    }

    /// Name used to create the resource: the descriptor's name, falling back
    /// to the kind's name field in the desired config.
    pub fn creation_name(&self) -> Result<String, ConvergeError> {
        self.name
            .clone()
            .or_else(|| {
                self.desired_config
                    .get(self.kind.name_key())
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                ConvergeError::InvalidDescriptor(format!(
                    "{} cannot be created without a name",
                    self.kind
                ))
            })
    }

    /// Short label for logs and errors
    pub fn label(&self) -> String {
        if let Some(id) = &self.resolved_identifier {
            id.clone()
        } else if let Some(name) = &self.name {
            name.clone()
        } else if let Some(stable_id) = &self.stable_id {
            stable_id.to_string()
        } else {
            "<unnamed>".to_string()
        }
    }

    /// Record the resolved identifier. It can be set once; setting the same
    /// value again is a no-op.
    pub(crate) fn set_resolved_identifier(&mut self, identifier: &str) -> Result<(), ConvergeError> {
        match &self.resolved_identifier {
            Some(existing) if existing == identifier => Ok(()),
            Some(existing) => Err(ConvergeError::InvalidDescriptor(format!(
                "{} is already resolved to '{existing}', refusing to rebind to '{identifier}'",
                self.kind
            ))),
            None => {
                self.resolved_identifier = Some(identifier.to_string());
                Ok(())
            }
        }
    }

    /// Record the identifier returned by a create call. A previous binding is
    /// replaced only when that object was last seen absent.
    pub(crate) fn bind_created(&mut self, identifier: &str) -> Result<(), ConvergeError> {
        match &self.resolved_identifier {
            Some(existing) if existing != identifier && self.exists == Existence::Absent => {
                self.resolved_identifier = Some(identifier.to_string());
                Ok(())
            }
            _ => self.set_resolved_identifier(identifier),
        }
    }

    pub(crate) fn set_exists(&mut self, exists: Existence) {
        self.exists = exists;
    }
}

/// Serialized desired-state entry, as read by the CLI
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorSpec {
    pub kind: ResourceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stable_id: Option<Uuid>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

impl DescriptorSpec {
    pub fn into_descriptor(self) -> Result<ResourceDescriptor, ConvergeError> {
        let mut descriptor = match (self.name, self.stable_id) {
            (Some(name), stable_id) => {
                let d = ResourceDescriptor::named(self.kind, name);
                match stable_id {
                    Some(id) => d.with_stable_id(id),
                    None => d,
                }
            }
            (None, Some(id)) => ResourceDescriptor::by_stable_id(self.kind, id),
            (None, None) => {
                return Err(ConvergeError::InvalidDescriptor(format!(
                    "{} entry needs a name or a stable_id",
                    self.kind
                )));
            }
        };
        descriptor = descriptor.with_config(self.config);
        if let Some(region) = self.region {
            descriptor = descriptor.with_region(region);
        }
        Ok(descriptor)
    }
}
