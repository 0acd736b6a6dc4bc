//! Transactional indexed store traits
//!
//! The policy engine never touches storage directly: everything it reads or writes
//! goes through a [`ReadTx`] or [`WriteTx`] handed out by a [`TransactionalStore`].
//! A write transaction either commits every change made through it or none.

use crate::error::{CoreError, Result};
use crate::types::{
    DenormCollection, EntityId, EntityType, LinkKey, Policy, PolicyType, Semantic, TaggedEntity,
};

/// Callback run after a write transaction commits
pub type CommitHook = Box<dyn FnOnce() + Send + 'static>;

/// Read capabilities available inside any transaction
pub trait ReadTx {
    /// All entity ids of a type, in id order
    fn entity_ids(&self, entity_type: EntityType) -> Vec<EntityId>;

    /// Ids of entities whose tags satisfy `tags` under `semantic`
    ///
    /// An empty tag list matches nothing.
    fn tag_index_cursor(
        &self,
        entity_type: EntityType,
        tags: &[String],
        semantic: Semantic,
    ) -> Vec<EntityId>;

    /// Load an entity
    fn entity(&self, entity_type: EntityType, id: &str) -> Option<TaggedEntity>;

    /// Current role attributes of an entity, `None` if it does not exist
    fn entity_tags(&self, entity_type: EntityType, id: &str) -> Option<Vec<String>>;

    /// Whether an entity exists
    fn entity_exists(&self, entity_type: EntityType, id: &str) -> bool;

    /// Resolve an entity name to its id
    fn entity_id_by_name(&self, entity_type: EntityType, name: &str) -> Option<EntityId>;

    /// All policy ids of a type, in id order
    fn policy_ids(&self, policy_type: PolicyType) -> Vec<EntityId>;

    /// Load a policy
    fn policy(&self, policy_type: PolicyType, id: &str) -> Option<Policy>;

    /// Entities currently linked to a policy on one side (first hop)
    fn linked_entities(&self, key: LinkKey, policy_id: &str) -> Vec<EntityId>;

    /// Policies currently linked to an entity on one side (first hop, reverse index)
    fn linked_policies(&self, key: LinkKey, entity_id: &str) -> Vec<EntityId>;

    /// Policy ids that hold at least one link on one side, whether or not the
    /// policy row still exists
    fn linked_policy_ids(&self, key: LinkKey) -> Vec<EntityId>;

    /// Whether a first-hop link exists
    fn is_linked(&self, key: LinkKey, policy_id: &str, entity_id: &str) -> bool;

    /// Stored counts for a pair as seen from the source and the target index
    fn ref_counts(
        &self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> (Option<i32>, Option<i32>);

    /// Partners of an entity in a collection with their counts
    ///
    /// `side` selects whether `id` is a source (partners are targets) or a
    /// target (partners are sources).
    fn ref_partners(
        &self,
        collection: DenormCollection,
        side: EntityType,
        id: &str,
    ) -> Vec<(EntityId, i32)>;

    /// Every (source, target) pair present in either index of a collection
    fn ref_pairs(&self, collection: DenormCollection) -> Vec<(EntityId, EntityId)>;
}

/// Write capabilities of a transaction
pub trait WriteTx: ReadTx {
    /// Insert or replace an entity, returning the previous version
    fn put_entity(
        &mut self,
        entity_type: EntityType,
        entity: TaggedEntity,
    ) -> Result<Option<TaggedEntity>>;

    /// Remove an entity row and its tag index entries
    fn delete_entity(&mut self, entity_type: EntityType, id: &str) -> Result<TaggedEntity>;

    /// Insert or replace a policy, returning the previous version
    fn put_policy(&mut self, policy: Policy) -> Result<Option<Policy>>;

    /// Remove a policy row
    fn delete_policy(&mut self, policy_type: PolicyType, id: &str) -> Result<Policy>;

    /// Add a first-hop link; returns whether state changed
    fn add_link(&mut self, key: LinkKey, policy_id: &str, entity_id: &str) -> Result<bool>;

    /// Remove a first-hop link; returns whether state changed
    fn remove_link(&mut self, key: LinkKey, policy_id: &str, entity_id: &str) -> Result<bool>;

    /// Increment a pair's count on both indexes, returning the new count
    fn increment_ref(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<i32>;

    /// Decrement a pair's count on both indexes, returning the new count
    ///
    /// Fails with [`CoreError::InvalidRefCount`] if the count is missing or zero.
    fn decrement_ref(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<i32>;

    /// Overwrite a pair's count on both indexes, returning the previous counts
    fn set_ref_count(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
        count: i32,
    ) -> Result<(Option<i32>, Option<i32>)>;

    /// Register a hook to run once the transaction has committed
    fn on_commit(&mut self, hook: CommitHook);
}

/// Store handing out closure-scoped transactions
pub trait TransactionalStore: Send + Sync {
    /// Run `f` against a read-only snapshot of committed state
    fn view<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&dyn ReadTx) -> std::result::Result<R, E>,
        E: From<CoreError>;

    /// Run `f` inside a write transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back every change otherwise. Commit
    /// hooks run after the commit and only then.
    fn update<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTx) -> std::result::Result<R, E>,
        E: From<CoreError>;
}
