//! Existence checks for resolved resources

use crate::aws::ignore_not_found;
use crate::descriptor::{Existence, ResourceDescriptor};
use crate::error::ConvergeError;
use converge_common::{AwsError, CloudApi, ExistenceProbe, ResourceKind};
use std::sync::Arc;
use tracing::debug;

/// Probe whether `identifier` exists, using the kind's probe
pub async fn probe<C: CloudApi>(
    api: &C,
    kind: ResourceKind,
    identifier: &str,
) -> Result<bool, AwsError> {
    Ok(match kind.existence_probe() {
        ExistenceProbe::Describe => ignore_not_found(api.describe(kind, identifier))
            .await?
            .is_some(),
        ExistenceProbe::CreationDate => ignore_not_found(api.creation_date(kind, identifier))
            .await?
            .flatten()
            .is_some(),
    })
}

pub struct ExistenceOracle<C> {
    api: Arc<C>,
}

impl<C> Clone for ExistenceOracle<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<C: CloudApi> ExistenceOracle<C> {
    pub fn new(api: Arc<C>) -> Self {
        Self { api }
    }

    /// Check existence and record the answer on the descriptor
    pub async fn exists(&self, descriptor: &mut ResourceDescriptor) -> Result<bool, ConvergeError> {
        let kind = descriptor.kind();
        let identifier = descriptor.resolved_identifier().ok_or_else(|| {
            ConvergeError::InvalidDescriptor(format!(
                "{kind} '{}' must be resolved before checking existence",
                descriptor.label()
            ))
        })?;

        let exists = probe(self.api.as_ref(), kind, identifier).await?;
        debug!(kind = %kind, identifier = %identifier, exists, "Probed existence");

        descriptor.set_exists(if exists {
            Existence::Present
        } else {
            Existence::Absent
        });
        Ok(exists)
    }
}
