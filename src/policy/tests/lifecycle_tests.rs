//! Entity and policy lifecycle tests
//!
//! Validation, rollback, name resolution, deletion cleanup, configuration and
//! the periodic integrity scheduler.

mod common;

use common::*;
use overlay_core::{
    CoreError, DenormCollection, EntityType, Policy, PolicyType, Semantic, TaggedEntity,
};
use overlay_policy::{parse_semantic, EngineConfig, IntegrityScheduler, PolicyError};
use std::sync::Arc;
use std::time::Duration;

const DIAL: DenormCollection = DenormCollection::IdentityServiceDial;

// ============================================================================
// ROLE SET VALIDATION
// ============================================================================

#[test]
fn test_wildcard_must_be_exclusive_on_create() {
    let engine = engine();
    create(&engine, EntityType::Identity, "i1", &["eng"]);

    let err = engine
        .create_policy(
            Policy::with_id(PolicyType::EdgeRouter, "p", "mixed")
                .with_roles(EntityType::Identity, ["all", "#eng"]),
        )
        .unwrap_err();
    assert_eq!(
        err,
        PolicyError::WildcardMustBeExclusive {
            field: "identityRoles".to_string()
        }
    );
    assert!(err.is_validation());
    assert!(engine.policy(PolicyType::EdgeRouter, "p").unwrap().is_none());
}

#[test]
fn test_wildcard_must_be_exclusive_on_update() {
    let engine = engine();
    create(&engine, EntityType::Service, "s1", &[]);
    let policy = engine
        .create_policy(
            Policy::with_id(PolicyType::ServiceEdgeRouter, "p", "serp")
                .with_roles(EntityType::Service, ["@s1"]),
        )
        .unwrap()
        .value;

    let err = engine
        .update_policy(policy.with_roles(EntityType::Service, ["ALL", "@s1"]))
        .unwrap_err();
    assert_eq!(err.field(), Some("serviceRoles"));

    let stored = engine
        .policy(PolicyType::ServiceEdgeRouter, "p")
        .unwrap()
        .unwrap();
    assert_eq!(stored.role_set(EntityType::Service), strings(&["@s1"]));
}

#[test]
fn test_wildcard_spellings_normalize() {
    let engine = engine();
    for (id, wildcard) in [("p1", "All"), ("p2", "#all")] {
        let policy = engine
            .create_policy(
                Policy::with_id(PolicyType::EdgeRouter, id, id)
                    .with_roles(EntityType::EdgeRouter, [wildcard]),
            )
            .unwrap()
            .value;
        assert_eq!(policy.role_set(EntityType::EdgeRouter), strings(&["all"]));
    }
}

#[test]
fn test_uppercase_legacy_wildcard_is_a_tag() {
    let engine = engine();
    create(&engine, EntityType::Identity, "tagged", &["ALL"]);
    create(&engine, EntityType::Identity, "untagged", &["other"]);
    create(&engine, EntityType::EdgeRouter, "r1", &[]);

    let policy = engine
        .create_policy(
            Policy::with_id(PolicyType::EdgeRouter, "p", "p")
                .with_roles(EntityType::Identity, ["#ALL"])
                .with_roles(EntityType::EdgeRouter, ["@r1"]),
        )
        .unwrap()
        .value;
    assert_eq!(policy.role_set(EntityType::Identity), strings(&["#ALL"]));

    assert!(engine.can_use_edge_router("tagged", "r1").unwrap());
    assert!(!engine.can_use_edge_router("untagged", "r1").unwrap());
    assert_consistent(&engine);
}

#[test]
fn test_role_format_rejected() {
    let engine = engine();
    let err = engine
        .create_policy(
            Policy::with_id(PolicyType::Service, "p", "bad")
                .with_roles(EntityType::Identity, ["eng"]),
        )
        .unwrap_err();
    assert!(matches!(err, PolicyError::InvalidRoleFormat { ref role, .. } if role == "eng"));
}

#[test]
fn test_empty_role_sets_allowed() {
    let engine = engine();
    create(&engine, EntityType::Identity, "i1", &["eng"]);
    create(&engine, EntityType::Service, "s1", &[]);

    let policy = engine
        .create_policy(
            Policy::with_id(PolicyType::Service, "p", "empty")
                .with_roles(EntityType::Identity, Vec::<String>::new()),
        )
        .unwrap()
        .value;
    assert!(linked(&engine, PolicyType::Service, EntityType::Identity, "p").is_empty());

    let policy = engine
        .update_policy(
            policy
                .with_roles(EntityType::Identity, ["#eng"])
                .with_roles(EntityType::Service, ["@s1"]),
        )
        .unwrap()
        .value;
    assert!(engine.can_dial("i1", "s1").unwrap());

    // emptying a side matches nothing again
    engine
        .update_policy(policy.with_roles(EntityType::Identity, Vec::<String>::new()))
        .unwrap();
    assert!(!engine.can_dial("i1", "s1").unwrap());
    assert_consistent(&engine);
}

#[test]
fn test_invalid_role_attribute_rejected() {
    let engine = engine();
    for bad in ["#eng", "@i2", ""] {
        let err = engine
            .create_entity(
                EntityType::Identity,
                TaggedEntity::with_id("i1", "alice").with_roles([bad]),
            )
            .unwrap_err();
        assert!(
            matches!(err, PolicyError::InvalidRoleAttribute { ref value, .. } if value == bad),
            "{:?}",
            err
        );
    }
    assert!(engine.entity(EntityType::Identity, "i1").unwrap().is_none());
}

#[test]
fn test_entity_roles_normalized() {
    let engine = engine();
    let entity = engine
        .create_entity(
            EntityType::Identity,
            TaggedEntity::with_id("i1", "alice").with_roles(["b", "a", "b"]),
        )
        .unwrap()
        .value;
    assert_eq!(entity.role_attributes, strings(&["a", "b"]));
}

#[test]
fn test_semantic_parsing() {
    assert_eq!(parse_semantic("ALLOF").unwrap(), Semantic::AllOf);
    assert!(matches!(
        parse_semantic("someOf"),
        Err(PolicyError::InvalidSemantic(_))
    ));
}

// ============================================================================
// REFERENCES
// ============================================================================

#[test]
fn test_missing_reference_rolls_back() {
    let engine = engine();
    create(&engine, EntityType::Identity, "i1", &["eng"]);
    create(&engine, EntityType::Service, "s1", &[]);

    let err = engine
        .create_policy(
            Policy::with_id(PolicyType::Service, "p", "dial")
                .with_roles(EntityType::Identity, ["#eng"])
                .with_roles(EntityType::Service, ["@s1", "@missing"]),
        )
        .unwrap_err();
    match err {
        PolicyError::ReferenceNotFound { field, refs, .. } => {
            assert_eq!(field, "serviceRoles");
            assert_eq!(refs, strings(&["@missing"]));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(engine.policy(PolicyType::Service, "p").unwrap().is_none());
    assert!(linked(&engine, PolicyType::Service, EntityType::Identity, "p").is_empty());
    assert_eq!(count(&engine, DIAL, "i1", "s1"), 0);
    assert_eq!(engine.metrics().unwrap().rolled_back_mutations, 1);
}

#[test]
fn test_references_resolve_by_name() {
    let engine = engine();
    engine
        .create_entity(EntityType::Identity, TaggedEntity::with_id("id-1", "alice"))
        .unwrap();
    create(&engine, EntityType::Service, "s1", &[]);

    let policy = engine
        .create_policy(
            Policy::with_id(PolicyType::Service, "p", "by-name")
                .with_roles(EntityType::Identity, ["@alice"])
                .with_roles(EntityType::Service, ["@s1"]),
        )
        .unwrap()
        .value;
    assert_eq!(policy.role_set(EntityType::Identity), strings(&["@id-1"]));
    assert!(engine.can_dial("id-1", "s1").unwrap());
}

#[test]
fn test_names_are_unique_per_type() {
    let engine = engine();
    engine
        .create_entity(EntityType::Identity, TaggedEntity::with_id("i1", "alice"))
        .unwrap();

    let err = engine
        .create_entity(EntityType::Identity, TaggedEntity::with_id("i2", "alice"))
        .unwrap_err();
    assert!(matches!(err, PolicyError::Store(CoreError::NameInUse { .. })));
    assert!(err.is_validation());

    // same name on another type is fine
    engine
        .create_entity(EntityType::Service, TaggedEntity::with_id("s1", "alice"))
        .unwrap();

    let err = engine
        .create_entity(EntityType::Identity, TaggedEntity::with_id("i1", "bob"))
        .unwrap_err();
    assert!(matches!(err, PolicyError::Store(CoreError::AlreadyExists { .. })));
}

#[test]
fn test_unknown_entity_operations() {
    let engine = engine();
    let err = engine
        .update_entity(EntityType::Service, TaggedEntity::with_id("s9", "s9"))
        .unwrap_err();
    assert!(matches!(err, PolicyError::Store(ref e) if e.is_not_found()));

    let err = engine.delete_policy(PolicyType::Service, "nope").unwrap_err();
    assert!(matches!(err, PolicyError::Store(ref e) if e.is_not_found()));
}

// ============================================================================
// DELETION
// ============================================================================

#[test]
fn test_entity_deletion_leaves_no_residue() {
    let engine = engine();
    create(&engine, EntityType::Identity, "i1", &["eng"]);
    create(&engine, EntityType::Service, "s1", &[]);
    create(&engine, EntityType::EdgeRouter, "r1", &[]);
    engine
        .create_policy(
            Policy::with_id(PolicyType::Service, "sp", "dial")
                .with_roles(EntityType::Identity, ["@i1"])
                .with_roles(EntityType::Service, ["all"]),
        )
        .unwrap();
    engine
        .create_policy(
            Policy::with_id(PolicyType::EdgeRouter, "erp", "routers")
                .with_roles(EntityType::Identity, ["#eng"])
                .with_roles(EntityType::EdgeRouter, ["all"]),
        )
        .unwrap();
    assert!(engine.can_dial("i1", "s1").unwrap());
    assert!(engine.can_use_edge_router("i1", "r1").unwrap());

    let deleted = engine.delete_entity(EntityType::Identity, "i1").unwrap();
    assert_eq!(deleted.value.id, "i1");
    assert_eq!(deleted.events.len(), 1);

    for collection in [DIAL, DenormCollection::IdentityEdgeRouter] {
        assert!(engine
            .related(collection, EntityType::Identity, "i1")
            .unwrap()
            .is_empty());
    }
    assert!(engine
        .related(DenormCollection::IdentityEdgeRouter, EntityType::EdgeRouter, "r1")
        .unwrap()
        .is_empty());

    let policy = engine.policy(PolicyType::Service, "sp").unwrap().unwrap();
    assert!(policy.role_set(EntityType::Identity).is_empty());
    assert_consistent(&engine);

    // recreating the same id does not resurrect the explicit reference
    create(&engine, EntityType::Identity, "i1", &[]);
    assert!(!engine.can_dial("i1", "s1").unwrap());
    assert_consistent(&engine);
}

// ============================================================================
// CHANGE NOTIFICATIONS
// ============================================================================

#[test]
fn test_role_set_change_rejects_missing_side() {
    let engine = engine();
    engine
        .create_policy(Policy::with_id(PolicyType::EdgeRouter, "p", "erp"))
        .unwrap();

    let err = engine
        .write(|ctx| {
            ctx.on_policy_role_set_changed(
                PolicyType::EdgeRouter,
                "p",
                EntityType::PostureCheck,
                &[],
                &strings(&["all"]),
            )
        })
        .unwrap_err();
    assert!(matches!(err, PolicyError::InvalidInput(_)));
}

#[test]
fn test_role_set_change_through_context() {
    let engine = engine();
    create(&engine, EntityType::Identity, "i1", &[]);
    create(&engine, EntityType::EdgeRouter, "r1", &[]);
    engine
        .create_policy(
            Policy::with_id(PolicyType::EdgeRouter, "p", "erp")
                .with_roles(EntityType::EdgeRouter, ["@r1"]),
        )
        .unwrap();

    engine
        .write(|ctx| {
            ctx.on_policy_role_set_changed(
                PolicyType::EdgeRouter,
                "p",
                EntityType::Identity,
                &[],
                &strings(&["@i1"]),
            )
        })
        .unwrap();
    assert!(engine.can_use_edge_router("i1", "r1").unwrap());

    let policy = engine.policy(PolicyType::EdgeRouter, "p").unwrap().unwrap();
    assert_eq!(policy.role_set(EntityType::Identity), strings(&["@i1"]));
    assert_consistent(&engine);
}

#[test]
fn test_identical_tags_are_a_no_op() {
    let engine = engine();
    create(&engine, EntityType::Identity, "i1", &["a", "b"]);
    create(&engine, EntityType::Service, "s1", &[]);
    engine
        .create_policy(
            Policy::with_id(PolicyType::Service, "p", "ab")
                .with_roles(EntityType::Identity, ["#a"])
                .with_roles(EntityType::Service, ["@s1"]),
        )
        .unwrap();

    let committed = engine
        .write(|ctx| {
            ctx.on_entity_tags_changed(
                EntityType::Identity,
                "i1",
                &strings(&["a", "b"]),
                &strings(&["b", "a", "a"]),
            )?;
            Ok(ctx.stats())
        })
        .unwrap();
    assert_eq!(committed.value.matched + committed.value.unmatched, 0);
    assert_eq!(count(&engine, DIAL, "i1", "s1"), 1);
}

#[test]
fn test_multiple_mutations_in_one_transaction() {
    let engine = engine();
    let committed = engine
        .write(|ctx| {
            ctx.create_entity(
                EntityType::Identity,
                TaggedEntity::with_id("i1", "i1").with_roles(["eng"]),
            )?;
            ctx.create_entity(EntityType::Service, TaggedEntity::with_id("s1", "s1"))?;
            ctx.create_policy(
                Policy::with_id(PolicyType::Service, "p", "dial")
                    .with_roles(EntityType::Identity, ["#eng"])
                    .with_roles(EntityType::Service, ["@s1"]),
            )?;
            Ok(())
        })
        .unwrap();
    assert_eq!(committed.events.len(), 1);
    assert!(engine.can_dial("i1", "s1").unwrap());

    // a failure at the end discards everything before it
    let result = engine.write(|ctx| {
        ctx.delete_policy(PolicyType::Service, "p")?;
        ctx.create_entity(EntityType::Identity, TaggedEntity::with_id("i1", "dup"))?;
        Ok(())
    });
    assert!(result.is_err());
    assert!(engine.can_dial("i1", "s1").unwrap());
    assert_consistent(&engine);
}

// ============================================================================
// CONFIGURATION AND SCHEDULING
// ============================================================================

#[test]
fn test_engine_rejects_bad_config() {
    let err = EngineConfig::from_json(r#"{"integrity": {"interval_secs": 0}}"#).unwrap_err();
    assert!(matches!(err, PolicyError::Configuration(_)));
}

#[tokio::test]
async fn test_scheduler_runs_and_stops() {
    let engine = Arc::new(engine());
    create(&engine, EntityType::Identity, "i1", &["eng"]);
    create(&engine, EntityType::EdgeRouter, "r1", &[]);
    engine
        .create_policy(
            Policy::with_id(PolicyType::EdgeRouter, "p", "erp")
                .with_roles(EntityType::Identity, ["#eng"])
                .with_roles(EntityType::EdgeRouter, ["all"]),
        )
        .unwrap();
    engine
        .store()
        .set_source_side_count(DenormCollection::IdentityEdgeRouter, "i1", "r1", Some(5));

    let scheduler =
        IntegrityScheduler::spawn_with_period(engine.clone(), Duration::from_millis(10), true);

    let mut waited = Duration::ZERO;
    while scheduler.runs() == 0 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(scheduler.runs() >= 1);
    scheduler.shutdown().await;

    assert_eq!(
        count(&engine, DenormCollection::IdentityEdgeRouter, "i1", "r1"),
        1
    );
    assert!(engine.metrics().unwrap().integrity_runs >= 1);
}
