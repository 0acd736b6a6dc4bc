//! Shared helpers for policy engine integration tests

#![allow(dead_code)]

use overlay_core::{
    CoreError, DenormCollection, EntityType, LinkKey, MemoryStore, PolicyType, ReadTx,
    TaggedEntity, TransactionalStore,
};
use overlay_policy::{EngineConfig, PolicyEngine};
use std::sync::Arc;

pub type Engine = PolicyEngine<MemoryStore>;

/// Engine over a fresh store, strict ref counts on
pub fn engine() -> Engine {
    let config = EngineConfig {
        strict_ref_counts: true,
        ..Default::default()
    };
    PolicyEngine::new(Arc::new(MemoryStore::new()), config).unwrap()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Create an entity with a fixed id, using the id as its name
pub fn create(engine: &Engine, entity_type: EntityType, id: &str, tags: &[&str]) {
    engine
        .create_entity(
            entity_type,
            TaggedEntity::with_id(id, id).with_roles(tags.iter().copied()),
        )
        .unwrap();
}

/// Replace an entity's tags
pub fn retag(engine: &Engine, entity_type: EntityType, id: &str, tags: &[&str]) {
    engine
        .update_entity(
            entity_type,
            TaggedEntity::with_id(id, id).with_roles(tags.iter().copied()),
        )
        .unwrap();
}

/// Run the full integrity check and assert it finds nothing
pub fn assert_consistent(engine: &Engine) {
    let mut found = Vec::new();
    engine
        .run_full_integrity_check(false, |d, _| found.push(d.to_string()))
        .unwrap();
    assert!(found.is_empty(), "integrity discrepancies: {:#?}", found);
}

/// Stored source-side count of a pair (0 when absent); asserts both sides agree
pub fn count(engine: &Engine, collection: DenormCollection, source: &str, target: &str) -> i32 {
    let (source_count, target_count) = engine
        .store()
        .view(|tx| Ok::<_, CoreError>(tx.ref_counts(collection, source, target)))
        .unwrap();
    assert_eq!(source_count, target_count, "{} {} <-> {}", collection, source, target);
    source_count.unwrap_or(0)
}

/// Entities linked to a policy on one side
pub fn linked(engine: &Engine, policy_type: PolicyType, side: EntityType, policy_id: &str) -> Vec<String> {
    engine
        .store()
        .view(|tx| Ok::<_, CoreError>(tx.linked_entities(LinkKey::new(policy_type, side), policy_id)))
        .unwrap()
}
