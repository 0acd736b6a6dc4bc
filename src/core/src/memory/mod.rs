//! In-memory transactional store
//!
//! Write transactions work on a private copy of the committed state and swap it
//! in on success, so a failed mutation leaves nothing behind. Writers are
//! serialized by the state lock; readers see the last committed state.
//!
//! The copy is a full clone of every table, so each write transaction costs
//! O(store size) before it does any work. That is fine for tests, benches and
//! small embedded deployments; large stores should sit behind a backend with
//! real transactions.

mod tables;

use crate::error::{CoreError, Result};
use crate::traits::{CommitHook, ReadTx, TransactionalStore, WriteTx};
use crate::types::{
    DenormCollection, EntityId, EntityType, LinkKey, Policy, PolicyType, Semantic, TaggedEntity,
};
use parking_lot::RwLock;
use tables::StoreState;
use tracing::{debug, trace};

/// In-memory store implementing [`TransactionalStore`]
///
/// Every [`update`](TransactionalStore::update) clones the committed state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities of a type
    pub fn entity_count(&self, entity_type: EntityType) -> usize {
        self.state.read().entity_ids(entity_type).len()
    }

    /// Number of policies of a type
    pub fn policy_count(&self, policy_type: PolicyType) -> usize {
        self.state.read().policy_ids(policy_type).len()
    }

    /// Overwrite only the source-side count of a pair, leaving the target index alone
    ///
    /// Normal mutations always keep both indexes equal. This exists for recovery
    /// tooling and tests that need to reproduce a half-written pair.
    pub fn set_source_side_count(
        &self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
        count: Option<i32>,
    ) {
        self.state
            .write()
            .refs
            .entry(collection)
            .or_default()
            .set_source_side(source_id, target_id, count);
    }
}

impl TransactionalStore for MemoryStore {
    fn view<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&dyn ReadTx) -> std::result::Result<R, E>,
        E: From<CoreError>,
    {
        let state = self.state.read();
        f(&*state)
    }

    fn update<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTx) -> std::result::Result<R, E>,
        E: From<CoreError>,
    {
        let mut guard = self.state.write();
        let mut tx = MemoryWriteTx {
            state: guard.clone(),
            hooks: Vec::new(),
        };

        match f(&mut tx) {
            Ok(value) => {
                *guard = tx.state;
                drop(guard);
                trace!(hooks = tx.hooks.len(), "transaction committed");
                for hook in tx.hooks {
                    hook();
                }
                Ok(value)
            }
            Err(err) => {
                debug!("transaction rolled back");
                Err(err)
            }
        }
    }
}

impl ReadTx for StoreState {
    fn entity_ids(&self, entity_type: EntityType) -> Vec<EntityId> {
        self.entities
            .get(&entity_type)
            .map(|t| t.ids())
            .unwrap_or_default()
    }

    fn tag_index_cursor(
        &self,
        entity_type: EntityType,
        tags: &[String],
        semantic: Semantic,
    ) -> Vec<EntityId> {
        self.entities
            .get(&entity_type)
            .map(|t| t.matching(tags, semantic))
            .unwrap_or_default()
    }

    fn entity(&self, entity_type: EntityType, id: &str) -> Option<TaggedEntity> {
        self.entities.get(&entity_type)?.get(id).cloned()
    }

    fn entity_tags(&self, entity_type: EntityType, id: &str) -> Option<Vec<String>> {
        self.entities
            .get(&entity_type)?
            .get(id)
            .map(|e| e.role_attributes.clone())
    }

    fn entity_exists(&self, entity_type: EntityType, id: &str) -> bool {
        self.entities
            .get(&entity_type)
            .map_or(false, |t| t.get(id).is_some())
    }

    fn entity_id_by_name(&self, entity_type: EntityType, name: &str) -> Option<EntityId> {
        self.entities.get(&entity_type)?.id_by_name(name)
    }

    fn policy_ids(&self, policy_type: PolicyType) -> Vec<EntityId> {
        self.policies
            .get(&policy_type)
            .map(|t| t.ids())
            .unwrap_or_default()
    }

    fn policy(&self, policy_type: PolicyType, id: &str) -> Option<Policy> {
        self.policies.get(&policy_type)?.get(id).cloned()
    }

    fn linked_entities(&self, key: LinkKey, policy_id: &str) -> Vec<EntityId> {
        self.links
            .get(&key)
            .map(|t| t.entities(policy_id))
            .unwrap_or_default()
    }

    fn linked_policies(&self, key: LinkKey, entity_id: &str) -> Vec<EntityId> {
        self.links
            .get(&key)
            .map(|t| t.policies(entity_id))
            .unwrap_or_default()
    }

    fn linked_policy_ids(&self, key: LinkKey) -> Vec<EntityId> {
        self.links
            .get(&key)
            .map(|t| t.policy_ids())
            .unwrap_or_default()
    }

    fn is_linked(&self, key: LinkKey, policy_id: &str, entity_id: &str) -> bool {
        self.links
            .get(&key)
            .map_or(false, |t| t.contains(policy_id, entity_id))
    }

    fn ref_counts(
        &self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> (Option<i32>, Option<i32>) {
        self.refs
            .get(&collection)
            .map(|t| t.counts(source_id, target_id))
            .unwrap_or((None, None))
    }

    fn ref_partners(
        &self,
        collection: DenormCollection,
        side: EntityType,
        id: &str,
    ) -> Vec<(EntityId, i32)> {
        let from_source = side == collection.source();
        self.refs
            .get(&collection)
            .map(|t| t.partners(from_source, id))
            .unwrap_or_default()
    }

    fn ref_pairs(&self, collection: DenormCollection) -> Vec<(EntityId, EntityId)> {
        self.refs
            .get(&collection)
            .map(|t| t.pairs())
            .unwrap_or_default()
    }
}

/// Working copy of the store plus the hooks to run after commit
struct MemoryWriteTx {
    state: StoreState,
    hooks: Vec<CommitHook>,
}

impl ReadTx for MemoryWriteTx {
    fn entity_ids(&self, entity_type: EntityType) -> Vec<EntityId> {
        self.state.entity_ids(entity_type)
    }

    fn tag_index_cursor(
        &self,
        entity_type: EntityType,
        tags: &[String],
        semantic: Semantic,
    ) -> Vec<EntityId> {
        self.state.tag_index_cursor(entity_type, tags, semantic)
    }

    fn entity(&self, entity_type: EntityType, id: &str) -> Option<TaggedEntity> {
        self.state.entity(entity_type, id)
    }

    fn entity_tags(&self, entity_type: EntityType, id: &str) -> Option<Vec<String>> {
        self.state.entity_tags(entity_type, id)
    }

    fn entity_exists(&self, entity_type: EntityType, id: &str) -> bool {
        self.state.entity_exists(entity_type, id)
    }

    fn entity_id_by_name(&self, entity_type: EntityType, name: &str) -> Option<EntityId> {
        self.state.entity_id_by_name(entity_type, name)
    }

    fn policy_ids(&self, policy_type: PolicyType) -> Vec<EntityId> {
        self.state.policy_ids(policy_type)
    }

    fn policy(&self, policy_type: PolicyType, id: &str) -> Option<Policy> {
        self.state.policy(policy_type, id)
    }

    fn linked_entities(&self, key: LinkKey, policy_id: &str) -> Vec<EntityId> {
        self.state.linked_entities(key, policy_id)
    }

    fn linked_policies(&self, key: LinkKey, entity_id: &str) -> Vec<EntityId> {
        self.state.linked_policies(key, entity_id)
    }

    fn linked_policy_ids(&self, key: LinkKey) -> Vec<EntityId> {
        self.state.linked_policy_ids(key)
    }

    fn is_linked(&self, key: LinkKey, policy_id: &str, entity_id: &str) -> bool {
        self.state.is_linked(key, policy_id, entity_id)
    }

    fn ref_counts(
        &self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> (Option<i32>, Option<i32>) {
        self.state.ref_counts(collection, source_id, target_id)
    }

    fn ref_partners(
        &self,
        collection: DenormCollection,
        side: EntityType,
        id: &str,
    ) -> Vec<(EntityId, i32)> {
        self.state.ref_partners(collection, side, id)
    }

    fn ref_pairs(&self, collection: DenormCollection) -> Vec<(EntityId, EntityId)> {
        self.state.ref_pairs(collection)
    }
}

impl WriteTx for MemoryWriteTx {
    fn put_entity(
        &mut self,
        entity_type: EntityType,
        entity: TaggedEntity,
    ) -> Result<Option<TaggedEntity>> {
        self.state
            .entities
            .entry(entity_type)
            .or_default()
            .put(entity_type, entity)
    }

    fn delete_entity(&mut self, entity_type: EntityType, id: &str) -> Result<TaggedEntity> {
        self.state
            .entities
            .get_mut(&entity_type)
            .ok_or_else(|| CoreError::not_found(entity_type, id))?
            .delete(entity_type, id)
    }

    fn put_policy(&mut self, policy: Policy) -> Result<Option<Policy>> {
        self.state
            .policies
            .entry(policy.policy_type)
            .or_default()
            .put(policy)
    }

    fn delete_policy(&mut self, policy_type: PolicyType, id: &str) -> Result<Policy> {
        self.state
            .policies
            .get_mut(&policy_type)
            .ok_or_else(|| CoreError::not_found(policy_type, id))?
            .delete(policy_type, id)
    }

    fn add_link(&mut self, key: LinkKey, policy_id: &str, entity_id: &str) -> Result<bool> {
        Ok(self
            .state
            .links
            .entry(key)
            .or_default()
            .add(policy_id, entity_id))
    }

    fn remove_link(&mut self, key: LinkKey, policy_id: &str, entity_id: &str) -> Result<bool> {
        Ok(self
            .state
            .links
            .get_mut(&key)
            .map_or(false, |t| t.remove(policy_id, entity_id)))
    }

    fn increment_ref(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<i32> {
        Ok(self
            .state
            .refs
            .entry(collection)
            .or_default()
            .increment(source_id, target_id))
    }

    fn decrement_ref(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<i32> {
        self.state
            .refs
            .entry(collection)
            .or_default()
            .decrement(collection, source_id, target_id)
    }

    fn set_ref_count(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
        count: i32,
    ) -> Result<(Option<i32>, Option<i32>)> {
        if count < 0 {
            return Err(CoreError::invalid(format!(
                "{}: count for {} <-> {} cannot be negative",
                collection, source_id, target_id
            )));
        }
        Ok(self
            .state
            .refs
            .entry(collection)
            .or_default()
            .set(source_id, target_id, count))
    }

    fn on_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }
}
