//! End-to-end convergence against the in-memory cloud
//!
//! These exercise whole `put`/`destroy` chains through the public engine API
//! and assert on the exact mutating calls the fake recorded.

use converge_common::ResourceKind;
use converge_common::tags::{TAG_MANAGER, TAG_STABLE_ID};
use converge_engine::{
    ConvergeError, ConvergenceEngine, EngineSettings, Existence, PutOutcome, ResourceDescriptor,
    Step,
};
use converge_test_utils::fixtures::{ec2_trust_policy, read_bucket_policy_document};
use converge_test_utils::{Call, FailOn, FakeCloud, FakeWaiter, config, owned_by};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

fn engine(cloud: &Arc<FakeCloud>) -> ConvergenceEngine<FakeCloud, FakeWaiter> {
    engine_for(cloud, "converge")
}

fn engine_for(cloud: &Arc<FakeCloud>, manager: &str) -> ConvergenceEngine<FakeCloud, FakeWaiter> {
    ConvergenceEngine::new(
        Arc::clone(cloud),
        Arc::new(FakeWaiter::new()),
        EngineSettings::default().with_manager(manager),
    )
}

fn app_role(policies: &[&str]) -> ResourceDescriptor {
    ResourceDescriptor::named(ResourceKind::Role, "app").with_config(config(json!({
        "AssumeRolePolicyDocument": ec2_trust_policy(),
        "Description": "application role",
        "MaxSessionDuration": 3600,
        "Policies": policies,
        "Tags": {"team": "infra"},
    })))
}

#[tokio::test]
async fn second_put_issues_no_mutations() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.seed_with(
        ResourceKind::Policy,
        "read-logs",
        config(json!({"PolicyDocument": read_bucket_policy_document("logs").to_string()})),
        Some(owned_by("converge")),
    );
    let engine = engine(&cloud);

    let descriptors = || {
        vec![
            app_role(&["read-logs"]),
            ResourceDescriptor::named(ResourceKind::Policy, "read-logs").with_config(config(
                json!({"PolicyDocument": read_bucket_policy_document("logs")}),
            )),
            ResourceDescriptor::named(ResourceKind::Bucket, "logs").with_config(config(json!({
                "Policy": converge_test_utils::fixtures::deny_insecure_transport_bucket_policy(),
                "Tags": [{"Key": "env", "Value": "prod"}],
            }))),
        ]
    };

    for mut d in descriptors() {
        engine.put(&mut d, true, false).await.unwrap();
    }
    cloud.clear_mutations();

    for mut d in descriptors() {
        let outcome = engine.put(&mut d, true, false).await.unwrap();
        assert!(
            matches!(outcome, PutOutcome::Unchanged { .. }),
            "{} should be unchanged, got {outcome:?}",
            d.label()
        );
    }
    assert_eq!(cloud.mutations(), vec![]);
}

#[tokio::test]
async fn foreign_resource_is_left_alone() {
    let cloud = Arc::new(FakeCloud::new());
    let mut foreign = owned_by("team-b");
    foreign.insert("cost-center".into(), "42".into());
    cloud.seed(ResourceKind::Bucket, "shared", Some(foreign.clone()));

    let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "shared")
        .with_config(config(json!({"Tags": {"env": "prod"}})));
    let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

    match err {
        ConvergeError::Ownership { owner, manager, .. } => {
            assert_eq!(owner, "team-b");
            assert_eq!(manager, "converge");
        }
        other => panic!("expected ownership error, got {other:?}"),
    }
    assert_eq!(cloud.tags(ResourceKind::Bucket, "shared"), Some(foreign));
    assert_eq!(cloud.mutations(), vec![]);
}

#[tokio::test]
async fn owner_is_the_configured_manager() {
    let cloud = Arc::new(FakeCloud::new());
    let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "data");
    engine_for(&cloud, "team-a").put(&mut d, false, false).await.unwrap();

    let tags = cloud.tags(ResourceKind::Bucket, "data").unwrap();
    assert_eq!(tags[TAG_MANAGER], "team-a");

    let mut again = ResourceDescriptor::named(ResourceKind::Bucket, "data");
    let err = engine_for(&cloud, "team-b")
        .put(&mut again, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::Ownership { .. }));
}

#[tokio::test]
async fn stable_id_finds_created_resource() {
    let cloud = Arc::new(FakeCloud::new());
    let id = Uuid::new_v4();
    let engine = engine(&cloud);

    let mut created = ResourceDescriptor::named(ResourceKind::Policy, "read-logs")
        .with_stable_id(id)
        .with_config(config(json!({
            "Path": "/app/",
            "PolicyDocument": read_bucket_policy_document("logs"),
        })));
    let outcome = engine.put(&mut created, true, false).await.unwrap();
    assert!(matches!(outcome, PutOutcome::Created { .. }));

    let tags = cloud.tags(ResourceKind::Policy, outcome.identifier()).unwrap();
    assert_eq!(tags[TAG_STABLE_ID], id.to_string());

    let mut found = ResourceDescriptor::by_stable_id(ResourceKind::Policy, id);
    let identifier = engine.resolver().resolve(&mut found).await.unwrap();
    assert_eq!(identifier, outcome.identifier());
    assert_eq!(found.resolved_identifier(), created.resolved_identifier());
}

#[tokio::test]
async fn ambiguous_policy_name_is_never_mutated() {
    let cloud = Arc::new(FakeCloud::new());
    let a = cloud.seed_with(
        ResourceKind::Policy,
        "dup",
        config(json!({"Path": "/a/"})),
        Some(owned_by("converge")),
    );
    let b = cloud.seed_with(
        ResourceKind::Policy,
        "dup",
        config(json!({"Path": "/b/"})),
        Some(owned_by("converge")),
    );

    let mut d = ResourceDescriptor::named(ResourceKind::Policy, "dup")
        .with_config(config(json!({"PolicyDocument": read_bucket_policy_document("logs")})));
    let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

    match err {
        ConvergeError::AmbiguousIdentity { matches, .. } => assert_eq!(matches, vec![a, b]),
        other => panic!("expected ambiguity, got {other:?}"),
    }
    assert_eq!(d.resolved_identifier(), None);
    assert_eq!(cloud.mutations(), vec![]);
}

#[tokio::test]
async fn attachments_converge_to_the_wanted_set() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.seed(ResourceKind::Role, "app", Some(owned_by("converge")));
    let a = cloud.seed(ResourceKind::Policy, "a", None);
    let b = cloud.seed(ResourceKind::Policy, "b", None);
    let c = cloud.seed(ResourceKind::Policy, "c", None);
    cloud.seed_attachment(ResourceKind::Role, "app", &a);
    cloud.seed_attachment(ResourceKind::Role, "app", &b);

    let mut d = ResourceDescriptor::named(ResourceKind::Role, "app")
        .with_config(config(json!({"Policies": ["b", c.clone()]})));
    let outcome = engine(&cloud).put(&mut d, false, false).await.unwrap();

    assert_eq!(
        outcome,
        PutOutcome::Updated {
            identifier: "app".into(),
            changes: 2
        }
    );
    assert_eq!(
        cloud.mutations(),
        vec![
            Call::Detach {
                kind: ResourceKind::Role,
                parent: "app".into(),
                member: a
            },
            Call::Attach {
                kind: ResourceKind::Role,
                parent: "app".into(),
                member: c.clone()
            },
        ]
    );
    assert_eq!(cloud.attached(ResourceKind::Role, "app"), vec![b, c]);
}

#[tokio::test]
async fn failed_attach_reports_partial_convergence() {
    let cloud = Arc::new(FakeCloud::new());
    let good = cloud.seed(ResourceKind::Policy, "good", None);
    let bad = cloud.seed(ResourceKind::Policy, "bad", None);
    cloud.fail(FailOn::Attach, &bad, "AccessDenied");

    let mut d = app_role(&["good", "bad"]);
    let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

    assert_eq!(err.failed_steps(), vec![&Step::Attach(bad)]);
    assert!(matches!(err, ConvergeError::PartialConvergence { .. }));
    // The role itself was created and kept
    assert_eq!(d.exists(), Existence::Present);
    assert_eq!(cloud.attached(ResourceKind::Role, "app"), vec![good]);

    // Once the failure clears, the next put finishes the job
    cloud.heal();
    cloud.clear_mutations();
    let mut retry = app_role(&["good", "bad"]);
    let outcome = engine(&cloud).put(&mut retry, false, false).await.unwrap();
    assert_eq!(
        outcome,
        PutOutcome::Updated {
            identifier: "app".into(),
            changes: 1
        }
    );
}

#[tokio::test]
async fn bucket_tag_update_keeps_unmanaged_tags() {
    let cloud = Arc::new(FakeCloud::new());
    let mut remote = owned_by("converge");
    remote.insert("billing".into(), "ops".into());
    cloud.seed(ResourceKind::Bucket, "logs", Some(remote));

    let mut d = ResourceDescriptor::named(ResourceKind::Bucket, "logs")
        .with_config(config(json!({"Tags": {"env": "prod"}})));
    engine(&cloud).put(&mut d, false, false).await.unwrap();

    let tags = cloud.tags(ResourceKind::Bucket, "logs").unwrap();
    assert_eq!(tags["billing"], "ops");
    assert_eq!(tags["env"], "prod");
    assert_eq!(tags[TAG_MANAGER], "converge");
}

#[tokio::test]
async fn put_then_destroy_round_trip() {
    let cloud = Arc::new(FakeCloud::new());
    let waiter = Arc::new(FakeWaiter::new());
    let engine = ConvergenceEngine::new(
        Arc::clone(&cloud),
        Arc::clone(&waiter),
        EngineSettings::default(),
    );
    let policy = cloud.seed_aws_managed_policy("ReadOnlyAccess");

    let mut d = app_role(&["ReadOnlyAccess"]);
    engine.put(&mut d, true, false).await.unwrap();
    assert_eq!(cloud.attached(ResourceKind::Role, "app"), vec![policy.clone()]);

    assert!(engine.destroy(&mut d, true, false).await.unwrap());
    assert!(!cloud.contains(ResourceKind::Role, "app"));
    assert!(cloud.contains(ResourceKind::Policy, &policy));
    assert_eq!(waiter.waits(), 2);
}

#[tokio::test]
async fn unknown_policy_name_is_a_failed_attach() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.seed(ResourceKind::Role, "app", Some(owned_by("converge")));
    let stale = cloud.seed(ResourceKind::Policy, "a", None);
    cloud.seed_attachment(ResourceKind::Role, "app", &stale);

    let mut d = ResourceDescriptor::named(ResourceKind::Role, "app")
        .with_config(config(json!({"Policies": ["missing-policy"]})));
    let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

    assert!(!err.is_not_found());
    assert!(matches!(err, ConvergeError::PartialConvergence { .. }));
    assert_eq!(err.failed_steps(), vec![&Step::Attach("missing-policy".into())]);
    // The rest of the set still converges
    assert_eq!(
        cloud.mutations(),
        vec![Call::Detach {
            kind: ResourceKind::Role,
            parent: "app".into(),
            member: stale
        }]
    );
    assert!(cloud.attached(ResourceKind::Role, "app").is_empty());
}

fn logs_bucket_with_policy() -> ResourceDescriptor {
    ResourceDescriptor::named(ResourceKind::Bucket, "logs").with_config(config(json!({
        "Policy": converge_test_utils::fixtures::deny_insecure_transport_bucket_policy(),
        "Tags": {"env": "prod"},
    })))
}

#[tokio::test]
async fn failed_bucket_policy_on_create_keeps_the_bucket() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.fail(FailOn::Update, "logs", "AccessDenied");

    let mut d = logs_bucket_with_policy();
    let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

    assert!(matches!(err, ConvergeError::PartialConvergence { .. }));
    assert_eq!(err.failed_steps(), vec![&Step::Update("PutBucketPolicy")]);
    assert_eq!(d.exists(), Existence::Present);
    assert_eq!(d.resolved_identifier(), Some("logs"));
    assert_eq!(cloud.tags(ResourceKind::Bucket, "logs").unwrap()["env"], "prod");
}

#[tokio::test]
async fn failed_bucket_policy_on_update_still_applies_tags() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.seed(ResourceKind::Bucket, "logs", Some(owned_by("converge")));
    cloud.fail(FailOn::Update, "logs", "AccessDenied");

    let mut d = logs_bucket_with_policy();
    let err = engine(&cloud).put(&mut d, false, false).await.unwrap_err();

    assert!(matches!(err, ConvergeError::PartialConvergence { .. }));
    assert_eq!(err.failed_steps(), vec![&Step::Update("PutBucketPolicy")]);
    let tags = cloud.tags(ResourceKind::Bucket, "logs").unwrap();
    assert_eq!(tags["env"], "prod");
    assert_eq!(tags[TAG_MANAGER], "converge");
    assert_eq!(
        cloud.mutations(),
        vec![Call::SetTags {
            kind: ResourceKind::Bucket,
            identifier: "logs".into()
        }]
    );

    cloud.heal();
    let mut retry = logs_bucket_with_policy();
    let outcome = engine(&cloud).put(&mut retry, false, false).await.unwrap();
    assert_eq!(
        outcome,
        PutOutcome::Updated {
            identifier: "logs".into(),
            changes: 1
        }
    );
}

#[tokio::test]
async fn vanished_policy_is_recreated_under_its_new_path() {
    let cloud = Arc::new(FakeCloud::new());
    let old = format!(
        "arn:aws:iam::{}:policy/v1/read-logs",
        converge_test_utils::fake::FAKE_ACCOUNT_ID
    );
    let mut d = ResourceDescriptor::from_identifier(ResourceKind::Policy, old).with_config(config(
        json!({
            "PolicyName": "read-logs",
            "Path": "/v2/",
            "PolicyDocument": read_bucket_policy_document("logs"),
        }),
    ));

    let outcome = engine(&cloud).put(&mut d, false, false).await.unwrap();

    let new = format!(
        "arn:aws:iam::{}:policy/v2/read-logs",
        converge_test_utils::fake::FAKE_ACCOUNT_ID
    );
    assert_eq!(outcome, PutOutcome::Created { identifier: new.clone() });
    assert_eq!(d.resolved_identifier(), Some(new.as_str()));
    assert_eq!(d.exists(), Existence::Present);
}
