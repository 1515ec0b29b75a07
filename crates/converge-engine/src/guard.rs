//! Ownership arbitration through the manager tag

use crate::descriptor::ResourceDescriptor;
use crate::error::ConvergeError;
use converge_common::TagMap;
use converge_common::tags::owner;
use tracing::warn;

/// Why a change to an existing resource was allowed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// The resource carries this manager's tag
    Owned,
    /// The resource carries no ownership tag
    Unclaimed,
    /// Another manager owns it; `force` took it over
    Overridden { previous_owner: String },
}

#[derive(Debug, Clone)]
pub struct OwnershipGuard {
    manager: String,
}

impl OwnershipGuard {
    pub fn new(manager: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
        }
    }

    pub fn authorize(
        &self,
        descriptor: &ResourceDescriptor,
        remote_tags: &TagMap,
        force: bool,
    ) -> Result<Authorization, ConvergeError> {
        match owner(remote_tags) {
            None => Ok(Authorization::Unclaimed),
            Some(current) if current == self.manager => Ok(Authorization::Owned),
            Some(current) if force => {
                warn!(
                    kind = %descriptor.kind(),
                    resource = %descriptor.label(),
                    previous_owner = %current,
                    manager = %self.manager,
                    "Taking over resource managed by another engine"
                );
                Ok(Authorization::Overridden {
                    previous_owner: current.to_string(),
                })
            }
            Some(current) => Err(ConvergeError::Ownership {
                kind: descriptor.kind(),
                identifier: descriptor.label(),
                owner: current.to_string(),
                manager: self.manager.clone(),
            }),
        }
    }
}
