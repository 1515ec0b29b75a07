//! Convergence of one resource toward its desired config
//!
//! `put` is a single sequential chain of remote calls:
//!
//! ```text
//! resolve ──► NotFound ───────────────► CREATE ─► wait? ─► deferred steps
//!    │
//!    └──► exists? ── no ──────────────► CREATE
//!              └──── yes ─► ownership ─► UPDATE (diffed calls, tags, attachments)
//! ```
//!
//! Every step past the create call is diff-driven, so converging an
//! already-converged resource issues no mutating call.

use crate::config::EngineSettings;
use crate::descriptor::{Existence, ResourceDescriptor};
use crate::diff::{UpdatePlan, plan_update, tags_drift};
use crate::error::{ConvergeError, Step, StepOutcome};
use crate::guard::OwnershipGuard;
use crate::lister::BulkLister;
use crate::oracle::ExistenceOracle;
use crate::processor::{ConfigProcessor, attached_policies, desired_tags};
use crate::resolver::IdentityResolver;
use converge_common::resource_kind::TAGS_KEY;
use converge_common::tags::{from_records, to_records};
use converge_common::{CloudApi, ConfigMap, ResourceKind, TagMap, UpdateCall, Waiter};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful `put` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Created { identifier: String },
    /// `changes` counts the mutating calls issued
    Updated { identifier: String, changes: usize },
    Unchanged { identifier: String },
}

impl PutOutcome {
    pub fn identifier(&self) -> &str {
        match self {
            PutOutcome::Created { identifier }
            | PutOutcome::Updated { identifier, .. }
            | PutOutcome::Unchanged { identifier } => identifier,
        }
    }
}

/// Per-member results of an attachment reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub outcomes: Vec<StepOutcome>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(StepOutcome::succeeded)
    }

    /// Number of attach/detach calls that went through
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }
}

pub struct ConvergenceEngine<C, W> {
    api: Arc<C>,
    waiter: Arc<W>,
    resolver: IdentityResolver<C>,
    oracle: ExistenceOracle<C>,
    guard: OwnershipGuard,
    processor: ConfigProcessor,
    region: Option<String>,
}

impl<C: CloudApi + 'static, W: Waiter> ConvergenceEngine<C, W> {
    pub fn new(api: Arc<C>, waiter: Arc<W>, settings: EngineSettings) -> Self {
        let mut lister = BulkLister::new(Arc::clone(&api), settings.lister);
        if let Some(region) = &settings.region {
            lister = lister.with_region(region.clone());
        }
        Self {
            resolver: IdentityResolver::new(Arc::clone(&api), lister),
            oracle: ExistenceOracle::new(Arc::clone(&api)),
            guard: OwnershipGuard::new(settings.manager.clone()),
            processor: ConfigProcessor::new(settings.manager),
            region: settings.region,
            api,
            waiter,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver<C> {
        &self.resolver
    }

    pub fn lister(&self) -> &BulkLister<C> {
        self.resolver.lister()
    }

    pub fn oracle(&self) -> &ExistenceOracle<C> {
        &self.oracle
    }

    pub fn processor(&self) -> &ConfigProcessor {
        &self.processor
    }

    /// Converge the remote resource toward the descriptor's desired config
    pub async fn put(
        &self,
        descriptor: &mut ResourceDescriptor,
        wait: bool,
        force: bool,
    ) -> Result<PutOutcome, ConvergeError> {
        self.check_region(descriptor)?;
        let existing = match self.resolver.resolve(descriptor).await {
            Ok(identifier) => self.oracle.exists(descriptor).await?.then_some(identifier),
            Err(ConvergeError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let processed = self
            .processor
            .process(descriptor.desired_config(), descriptor)?;

        match existing {
            Some(identifier) => self.update(descriptor, &identifier, &processed, force).await,
            None => self.create(descriptor, &processed, wait).await,
        }
    }

    async fn create(
        &self,
        descriptor: &mut ResourceDescriptor,
        processed: &ConfigMap,
        wait: bool,
    ) -> Result<PutOutcome, ConvergeError> {
        let kind = descriptor.kind();
        let name = descriptor.creation_name()?;
        let payload = self.processor.creation_payload(kind, processed);

        info!(kind = %kind, name = %name, "Resource does not exist, creating");
        let identifier = self.api.create(kind, &name, &payload).await?;
        if let Err(e) = descriptor.bind_created(&identifier) {
            warn!(kind = %kind, identifier = %identifier, error = %e, "Created resource cannot be bound");
            return Err(ConvergeError::PartialConvergence {
                kind,
                identifier,
                outcomes: vec![StepOutcome::from_result(
                    Step::BindIdentifier,
                    &Err::<(), _>(e),
                )],
            });
        }
        info!(kind = %kind, identifier = %identifier, "Resource created");

        if wait {
            self.waiter
                .wait_until_exists(kind, &identifier)
                .await
                .map_err(|e| ConvergeError::Wait {
                    kind,
                    identifier: identifier.clone(),
                    reason: format!("{e:#}"),
                })?;
        }

        let mut outcomes = Vec::new();

        if kind.is_non_creation_parameter(TAGS_KEY) {
            let records = to_records(&desired_tags(processed)?);
            let result = self.api.set_tags(kind, &identifier, &records).await;
            outcomes.push(StepOutcome::from_result(Step::ApplyTags, &result));
        }

        for call in kind.update_calls() {
            if !is_deferred(kind, call, processed) {
                continue;
            }
            if let UpdatePlan::Apply(payload) = plan_update(call, processed, &ConfigMap::new()) {
                let result = self.api.update(kind, call.name, &identifier, &payload).await;
                outcomes.push(StepOutcome::from_result(Step::Update(call.name), &result));
            }
        }

        self.reconcile_step(kind, &identifier, processed, &mut outcomes)
            .await?;

        descriptor.set_exists(Existence::Present);

        if outcomes.iter().all(StepOutcome::succeeded) {
            Ok(PutOutcome::Created { identifier })
        } else {
            Err(ConvergeError::PartialConvergence {
                kind,
                identifier,
                outcomes,
            })
        }
    }

    async fn update(
        &self,
        descriptor: &mut ResourceDescriptor,
        identifier: &str,
        processed: &ConfigMap,
        force: bool,
    ) -> Result<PutOutcome, ConvergeError> {
        let kind = descriptor.kind();
        let remote_tags = self.remote_tags(kind, identifier).await?;
        self.guard.authorize(descriptor, &remote_tags, force)?;

        let remote = self.api.describe(kind, identifier).await?;
        let mut outcomes = Vec::new();
        let mut changes = 0;

        for call in kind.update_calls() {
            match plan_update(call, processed, &remote) {
                UpdatePlan::Apply(payload) => {
                    let result = self.api.update(kind, call.name, identifier, &payload).await;
                    // Calls the create payload could carry fail fast, deferred ones are reported
                    if is_deferred(kind, call, processed) {
                        outcomes.push(StepOutcome::from_result(Step::Update(call.name), &result));
                        if result.is_err() {
                            continue;
                        }
                    } else {
                        result?;
                    }
                    info!(kind = %kind, identifier = %identifier, call = call.name, "Resource updated");
                    changes += 1;
                }
                UpdatePlan::MissingRequired(field) => {
                    debug!(call = call.name, field, "Skipping update call, required field not set");
                }
                UpdatePlan::NotRequested | UpdatePlan::InSync => {}
            }
        }

        let desired = desired_tags(processed)?;
        if tags_drift(&desired, &remote_tags) {
            // Bucket tagging replaces the whole set, so unmanaged remote tags are carried over
            let mut merged = remote_tags;
            merged.extend(desired);
            let result = self.api.set_tags(kind, identifier, &to_records(&merged)).await;
            if result.is_ok() {
                info!(kind = %kind, identifier = %identifier, "Tags updated");
                changes += 1;
            }
            outcomes.push(StepOutcome::from_result(Step::ApplyTags, &result));
        }

        changes += self
            .reconcile_step(kind, identifier, processed, &mut outcomes)
            .await?;

        descriptor.set_exists(Existence::Present);

        let identifier = identifier.to_string();
        if !outcomes.iter().all(StepOutcome::succeeded) {
            return Err(ConvergeError::PartialConvergence {
                kind,
                identifier,
                outcomes,
            });
        }
        Ok(if changes == 0 {
            PutOutcome::Unchanged { identifier }
        } else {
            PutOutcome::Updated { identifier, changes }
        })
    }

    /// Reconcile attached members if the kind has them and the config names
    /// them. Returns the number of attach/detach calls that went through.
    async fn reconcile_step(
        &self,
        kind: ResourceKind,
        identifier: &str,
        processed: &ConfigMap,
        outcomes: &mut Vec<StepOutcome>,
    ) -> Result<usize, ConvergeError> {
        let wanted = match kind.member_kind() {
            Some(_) => attached_policies(processed)?,
            None => None,
        };
        let Some(wanted) = wanted else {
            return Ok(0);
        };
        match self.reconcile_attached(kind, identifier, &wanted).await {
            Ok(report) => {
                let applied = report.applied();
                outcomes.extend(report.outcomes);
                Ok(applied)
            }
            Err(e) => {
                outcomes.push(StepOutcome::from_result(
                    Step::ReconcileAttachments,
                    &Err::<(), _>(e),
                ));
                Ok(0)
            }
        }
    }

    fn check_region(&self, descriptor: &ResourceDescriptor) -> Result<(), ConvergeError> {
        match (descriptor.region(), self.region.as_deref()) {
            (Some(wanted), Some(actual)) if wanted != actual => {
                Err(ConvergeError::InvalidDescriptor(format!(
                    "{} '{}' is pinned to region {wanted}, engine runs in {actual}",
                    descriptor.kind(),
                    descriptor.label()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Remote tags; a resource without a tag set has an empty map
    async fn remote_tags(
        &self,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<TagMap, ConvergeError> {
        match self.api.get_tags(kind, identifier).await {
            Ok(records) => Ok(from_records(&records)),
            Err(e) if e.is_no_tag_set() => Ok(TagMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Make the members attached to `parent` exactly `wanted`.
    ///
    /// Wanted references may be ARNs or policy names; one that cannot be
    /// resolved is reported as a failed attach. All detaches run
    /// before any attach, so a member being swapped out leaves a brief
    /// window with neither grant present. Member failures are reported,
    /// not rolled back.
    pub async fn reconcile_attached(
        &self,
        kind: ResourceKind,
        parent: &str,
        wanted: &[String],
    ) -> Result<ReconcileReport, ConvergeError> {
        let member_kind = kind.member_kind().ok_or_else(|| {
            ConvergeError::InvalidDescriptor(format!("{kind} has no attached members"))
        })?;

        let existing: BTreeSet<String> = self
            .api
            .list_attached(kind, parent)
            .await?
            .into_iter()
            .collect();

        let mut wanted_ids = BTreeSet::new();
        let mut unresolved = Vec::new();
        for reference in wanted {
            match self.resolver.resolve_reference(member_kind, reference).await {
                Ok(id) => {
                    wanted_ids.insert(id);
                }
                Err(e) => {
                    warn!(parent = %parent, member = %reference, error = %e, "Cannot resolve member");
                    unresolved.push(StepOutcome::from_result(
                        Step::Attach(reference.clone()),
                        &Err::<(), _>(e),
                    ));
                }
            }
        }

        let mut report = ReconcileReport::default();
        for member in existing.difference(&wanted_ids) {
            let result = self.api.detach(kind, parent, member).await;
            log_member_result("detach", parent, member, &result);
            report
                .outcomes
                .push(StepOutcome::from_result(Step::Detach(member.clone()), &result));
        }
        report.outcomes.extend(unresolved);
        for member in wanted_ids.difference(&existing) {
            let result = self.api.attach(kind, parent, member).await;
            log_member_result("attach", parent, member, &result);
            report
                .outcomes
                .push(StepOutcome::from_result(Step::Attach(member.clone()), &result));
        }
        Ok(report)
    }

    /// Delete the remote resource. Returns `false` if it was already gone.
    pub async fn destroy(
        &self,
        descriptor: &mut ResourceDescriptor,
        wait: bool,
        force: bool,
    ) -> Result<bool, ConvergeError> {
        self.check_region(descriptor)?;
        let identifier = match self.resolver.resolve(descriptor).await {
            Ok(identifier) => identifier,
            Err(ConvergeError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !self.oracle.exists(descriptor).await? {
            debug!(kind = %descriptor.kind(), identifier = %identifier, "Already absent");
            return Ok(false);
        }

        let kind = descriptor.kind();
        let remote_tags = self.remote_tags(kind, &identifier).await?;
        self.guard.authorize(descriptor, &remote_tags, force)?;

        if kind.member_kind().is_some() {
            for member in self.api.list_attached(kind, &identifier).await? {
                self.api.detach(kind, &identifier, &member).await?;
                debug!(parent = %identifier, member = %member, "Detached before delete");
            }
        }

        self.api.delete(kind, &identifier).await?;
        info!(kind = %kind, identifier = %identifier, "Resource deleted");

        if wait {
            self.waiter
                .wait_until_not_exists(kind, &identifier)
                .await
                .map_err(|e| ConvergeError::Wait {
                    kind,
                    identifier: identifier.clone(),
                    reason: format!("{e:#}"),
                })?;
        }

        descriptor.set_exists(Existence::Absent);
        Ok(true)
    }
}

/// An update call fed by a parameter the create call could not take
fn is_deferred(kind: ResourceKind, call: &UpdateCall, processed: &ConfigMap) -> bool {
    call.fields()
        .any(|f| kind.is_non_creation_parameter(f) && processed.contains_key(f))
}

fn log_member_result<T, E: std::fmt::Display>(
    action: &str,
    parent: &str,
    member: &str,
    result: &Result<T, E>,
) {
    match result {
        Ok(_) => info!(parent = %parent, member = %member, action, "Attachment reconciled"),
        Err(e) => warn!(
            parent = %parent,
            member = %member,
            action,
            error = %e,
            "Attachment change failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_test_utils::{Call, FakeCloud, FakeWaiter, config, owned_by};
    use serde_json::json;

    fn engine(cloud: &Arc<FakeCloud>) -> ConvergenceEngine<FakeCloud, FakeWaiter> {
        ConvergenceEngine::new(
            Arc::clone(cloud),
            Arc::new(FakeWaiter::new()),
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn creates_missing_role() {
        let cloud = Arc::new(FakeCloud::new());
        let mut d = ResourceDescriptor::named(ResourceKind::Role, "app")
            .with_config(config(json!({"Description": "app role", "Tags": {"team": "infra"}})));

        let outcome = engine(&cloud).put(&mut d, true, false).await.unwrap();

        assert_eq!(outcome, PutOutcome::Created { identifier: "app".into() });
        assert_eq!(d.exists(), Existence::Present);
        let tags = cloud.tags(ResourceKind::Role, "app").unwrap();
        assert_eq!(tags["team"], "infra");
        assert_eq!(tags["converge:manager"], "converge");
        assert_eq!(
            cloud.mutations(),
            vec![Call::Create { kind: ResourceKind::Role, name: "app".into() }]
        );
    }

    #[tokio::test]
    async fn bucket_tags_and_policy_are_deferred() {
        let cloud = Arc::new(FakeCloud::new());
        let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "logs").with_config(config(json!({
            "Policy": converge_test_utils::fixtures::deny_insecure_transport_bucket_policy()
        })));

        engine(&cloud).put(&mut d, false, false).await.unwrap();

        assert_eq!(
            cloud.mutations(),
            vec![
                Call::Create { kind: ResourceKind::Bucket, name: "logs".into() },
                Call::SetTags { kind: ResourceKind::Bucket, identifier: "logs".into() },
                Call::Update {
                    kind: ResourceKind::Bucket,
                    call: "PutBucketPolicy".into(),
                    identifier: "logs".into()
                },
            ]
        );
        let attrs = cloud.attributes(ResourceKind::Bucket, "logs").unwrap();
        assert!(attrs["Policy"].as_str().unwrap().contains("arn:aws:s3:::logs/*"));
    }

    #[tokio::test]
    async fn wait_failure_is_fatal() {
        let cloud = Arc::new(FakeCloud::new());
        let engine = ConvergenceEngine::new(
            Arc::clone(&cloud),
            Arc::new(FakeWaiter::failing("Timeout waiting for role app")),
            EngineSettings::default(),
        );
        let mut d = ResourceDescriptor::named(ResourceKind::Role, "app");
        let err = engine.put(&mut d, true, false).await.unwrap_err();
        assert!(matches!(err, ConvergeError::Wait { .. }));
    }

    #[tokio::test]
    async fn update_only_touches_drifted_fields() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed_with(
            ResourceKind::Role,
            "app",
            config(json!({"Description": "old", "MaxSessionDuration": 3600})),
            Some(owned_by("converge")),
        );
        let mut d = ResourceDescriptor::named(ResourceKind::Role, "app")
            .with_config(config(json!({"Description": "new", "MaxSessionDuration": 3600})));

        let outcome = engine(&cloud).put(&mut d, false, false).await.unwrap();

        assert_eq!(
            outcome,
            PutOutcome::Updated { identifier: "app".into(), changes: 1 }
        );
        assert_eq!(
            cloud.attributes(ResourceKind::Role, "app").unwrap()["Description"],
            "new"
        );
    }

    #[tokio::test]
    async fn failed_creatable_update_is_fatal() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed_with(
            ResourceKind::Role,
            "app",
            config(json!({"Description": "old"})),
            Some(owned_by("converge")),
        );
        cloud.fail(converge_test_utils::FailOn::Update, "app", "AccessDenied");
        let mut d = ResourceDescriptor::named(ResourceKind::Role, "app")
            .with_config(config(json!({"Description": "new", "Tags": {"team": "infra"}})));

        let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

        assert!(matches!(err, ConvergeError::Transport(_)));
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn untagged_bucket_is_claimed() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Bucket, "legacy", None);
        let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "legacy");

        engine(&cloud).put(&mut d, false, false).await.unwrap();

        assert_eq!(
            cloud.tags(ResourceKind::Bucket, "legacy").unwrap()["converge:manager"],
            "converge"
        );
    }

    #[tokio::test]
    async fn force_takes_over_foreign_resource() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Role, "app", Some(owned_by("team-b")));
        let mut d = ResourceDescriptor::named(ResourceKind::Role, "app");

        engine(&cloud).put(&mut d, false, true).await.unwrap();

        assert_eq!(
            cloud.tags(ResourceKind::Role, "app").unwrap()["converge:manager"],
            "converge"
        );
    }

    #[tokio::test]
    async fn destroy_detaches_then_deletes() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Role, "app", Some(owned_by("converge")));
        let policy = cloud.seed_aws_managed_policy("ReadOnlyAccess");
        cloud.seed_attachment(ResourceKind::Role, "app", &policy);
        let engine = engine(&cloud);

        let mut d = ResourceDescriptor::named(ResourceKind::Role, "app");
        assert!(engine.destroy(&mut d, true, false).await.unwrap());
        assert_eq!(d.exists(), Existence::Absent);
        assert_eq!(d.resolved_identifier(), Some("app"));
        assert!(!cloud.contains(ResourceKind::Role, "app"));

        let mut again = ResourceDescriptor::named(ResourceKind::Role, "app");
        assert!(!engine.destroy(&mut again, false, false).await.unwrap());
    }

    #[tokio::test]
    async fn destroy_respects_ownership() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Bucket, "shared", Some(owned_by("team-b")));
        let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "shared");

        let err = engine(&cloud).destroy(&mut d, false, false).await.unwrap_err();

        assert!(matches!(err, ConvergeError::Ownership { .. }));
        assert!(cloud.contains(ResourceKind::Bucket, "shared"));
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn descriptors_pinned_to_another_region_are_rejected() {
        let cloud = Arc::new(FakeCloud::new());
        let engine = ConvergenceEngine::new(
            Arc::clone(&cloud),
            Arc::new(FakeWaiter::new()),
            EngineSettings::default().with_region("us-east-1"),
        );
        let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "logs").with_region("eu-west-1");
        let err = engine.put(&mut d, false, false).await.unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidDescriptor(_)));
        assert!(cloud.mutations().is_empty());
    }

    #[tokio::test]
    async fn reconcile_rejects_kinds_without_members() {
        let cloud = Arc::new(FakeCloud::new());
        let err = engine(&cloud)
            .reconcile_attached(ResourceKind::Bucket, "logs", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::InvalidDescriptor(_)));
    }
}
