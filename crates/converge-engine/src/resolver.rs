//! Identity resolution: descriptor keys to remote identifiers
//!
//! Resolution never issues a mutating call. A resolved identifier is cached
//! on the descriptor, so resolving twice is free.

use crate::descriptor::{Existence, ResourceDescriptor};
use crate::error::ConvergeError;
use crate::lister::BulkLister;
use converge_common::{CloudApi, IdentityConvention, ListScope, ResourceKind};
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct IdentityResolver<C> {
    api: Arc<C>,
    lister: BulkLister<C>,
}

impl<C> Clone for IdentityResolver<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            lister: self.lister.clone(),
        }
    }
}

impl<C: CloudApi + 'static> IdentityResolver<C> {
    pub fn new(api: Arc<C>, lister: BulkLister<C>) -> Self {
        Self { api, lister }
    }

    pub fn lister(&self) -> &BulkLister<C> {
        &self.lister
    }

    /// Resolve the descriptor's remote identifier.
    ///
    /// Uses the cached identifier if present, then the name, then the stable
    /// id. A `NotFound` marks the descriptor absent.
    pub async fn resolve(
        &self,
        descriptor: &mut ResourceDescriptor,
    ) -> Result<String, ConvergeError> {
        if let Some(identifier) = descriptor.resolved_identifier() {
            return Ok(identifier.to_string());
        }

        let kind = descriptor.kind();
        let result = match (descriptor.name(), descriptor.stable_id()) {
            (Some(name), _) => self.resolve_name(kind, name).await,
            (None, Some(stable_id)) => self.resolve_stable_id(kind, stable_id).await,
            (None, None) => Err(ConvergeError::InvalidDescriptor(format!(
                "{kind} descriptor has no name, stable id or identifier"
            ))),
        };

        match result {
            Ok(identifier) => {
                descriptor.set_resolved_identifier(&identifier)?;
                Ok(identifier)
            }
            Err(e @ ConvergeError::NotFound { .. }) => {
                debug!(kind = %kind, resource = %descriptor.label(), "Resource not found");
                descriptor.set_exists(Existence::Absent);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve a name using the kind's identity convention
    pub async fn resolve_name(&self, kind: ResourceKind, name: &str) -> Result<String, ConvergeError> {
        match kind.identity_convention() {
            IdentityConvention::NameIsIdentifier => Ok(name.to_string()),
            IdentityConvention::LookupByName => {
                let matches: Vec<String> = self
                    .api
                    .list(kind, ListScope::All)
                    .await?
                    .into_iter()
                    .filter(|o| o.name == name)
                    .map(|o| o.identifier)
                    .collect();
                single_match(kind, name, matches)
            }
        }
    }

    /// Find the one managed resource carrying `stable_id`
    pub async fn resolve_stable_id(
        &self,
        kind: ResourceKind,
        stable_id: Uuid,
    ) -> Result<String, ConvergeError> {
        let matches: Vec<String> = self
            .lister
            .list(kind)
            .try_filter_map(|d| async move {
                Ok::<_, ConvergeError>(match d.stable_id() {
                    Some(id) if id == stable_id => d.resolved_identifier().map(str::to_string),
                    _ => None,
                })
            })
            .try_collect()
            .await?;
        single_match(kind, &stable_id.to_string(), matches)
    }

    /// Resolve a member reference: ARNs pass through, names are looked up
    pub async fn resolve_reference(
        &self,
        kind: ResourceKind,
        reference: &str,
    ) -> Result<String, ConvergeError> {
        if reference.starts_with("arn:") {
            Ok(reference.to_string())
        } else {
            self.resolve_name(kind, reference).await
        }
    }
}

fn single_match(
    kind: ResourceKind,
    key: &str,
    mut matches: Vec<String>,
) -> Result<String, ConvergeError> {
    match matches.len() {
        0 => Err(ConvergeError::NotFound {
            kind,
            key: key.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        _ => Err(ConvergeError::AmbiguousIdentity {
            kind,
            key: key.to_string(),
            matches,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListerConfig;
    use converge_common::tags::standard_tags;
    use converge_test_utils::{FakeCloud, config};
    use serde_json::json;

    fn resolver(cloud: &Arc<FakeCloud>) -> IdentityResolver<FakeCloud> {
        let lister = BulkLister::new(Arc::clone(cloud), ListerConfig::sequential());
        IdentityResolver::new(Arc::clone(cloud), lister)
    }

    #[tokio::test]
    async fn names_are_identifiers_for_roles_and_buckets() {
        let cloud = Arc::new(FakeCloud::new());
        let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "logs");
        assert_eq!(resolver(&cloud).resolve(&mut d).await.unwrap(), "logs");
        assert_eq!(d.resolved_identifier(), Some("logs"));
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn policy_lookup_includes_aws_managed_policies() {
        let cloud = Arc::new(FakeCloud::new());
        let arn = cloud.seed_aws_managed_policy("ReadOnlyAccess");
        let mut d = ResourceDescriptor::named(ResourceKind::Policy, "ReadOnlyAccess");
        assert_eq!(resolver(&cloud).resolve(&mut d).await.unwrap(), arn);
    }

    #[tokio::test]
    async fn missing_policy_marks_descriptor_absent() {
        let cloud = Arc::new(FakeCloud::new());
        let mut d = ResourceDescriptor::named(ResourceKind::Policy, "nope");
        let err = resolver(&cloud).resolve(&mut d).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(d.exists(), Existence::Absent);
        assert_eq!(d.resolved_identifier(), None);
    }

    #[tokio::test]
    async fn duplicate_stable_ids_are_ambiguous() {
        let cloud = Arc::new(FakeCloud::new());
        let id = Uuid::new_v4();
        cloud.seed(ResourceKind::Role, "a", Some(standard_tags("converge", Some(&id))));
        cloud.seed(ResourceKind::Role, "b", Some(standard_tags("converge", Some(&id))));

        let mut d = ResourceDescriptor::by_stable_id(ResourceKind::Role, id);
        match resolver(&cloud).resolve(&mut d).await {
            Err(ConvergeError::AmbiguousIdentity { matches, .. }) => {
                assert_eq!(matches, vec!["a", "b"])
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert_eq!(d.resolved_identifier(), None);
    }

    #[tokio::test]
    async fn references_pass_arns_through() {
        let cloud = Arc::new(FakeCloud::new());
        let mine = cloud.seed_with(
            ResourceKind::Policy,
            "mine",
            config(json!({"Path": "/app/"})),
            None,
        );
        let r = resolver(&cloud);
        assert_eq!(
            r.resolve_reference(ResourceKind::Policy, "arn:aws:iam::aws:policy/Unlisted")
                .await
                .unwrap(),
            "arn:aws:iam::aws:policy/Unlisted"
        );
        assert_eq!(r.resolve_reference(ResourceKind::Policy, "mine").await.unwrap(), mine);
    }
}
