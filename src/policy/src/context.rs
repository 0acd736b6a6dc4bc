//! Mutation context
//!
//! Wraps a caller's write transaction and exposes the entity and policy
//! operations. Every operation drives first-hop and second-hop maintenance in
//! the same transaction, so an error anywhere rolls back all of it.

use crate::error::{PolicyError, Result};
use crate::events::{ServiceEvent, ServiceEventSink};
use crate::hooks::TagChangeHooks;
use crate::metrics::MutationStats;
use crate::resolver::normalize_role_set;
use crate::roles::validate_role_attributes;
use chrono::Utc;
use overlay_core::{
    CommitHook, CoreError, EntityType, Policy, PolicyType, TaggedEntity, WriteTx,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Context over a type-erased write transaction
pub type TxContext<'a> = MutationContext<'a, dyn WriteTx + 'a>;

/// Engine entry points bound to one write transaction
pub struct MutationContext<'a, T: WriteTx + ?Sized> {
    pub(crate) tx: &'a mut T,
    pub(crate) hooks: &'a TagChangeHooks,
    pub(crate) strict: bool,
    pub(crate) events: ServiceEventSink,
    pub(crate) stats: MutationStats,
}

impl<'a, T: WriteTx + ?Sized> MutationContext<'a, T> {
    /// Bind a context to a transaction
    ///
    /// With `strict` set, a ref count that would go negative aborts the
    /// transaction; otherwise it is logged and clamped at zero.
    pub fn new(tx: &'a mut T, hooks: &'a TagChangeHooks, strict: bool) -> Self {
        Self {
            tx,
            hooks,
            strict,
            events: ServiceEventSink::new(),
            stats: MutationStats::default(),
        }
    }

    /// Read access to the underlying transaction
    pub fn tx(&self) -> &T {
        &*self.tx
    }

    /// Register a hook to run after the transaction commits
    pub fn on_commit(&mut self, hook: CommitHook) {
        self.tx.on_commit(hook);
    }

    /// Service events generated so far
    pub fn events(&self) -> &[ServiceEvent] {
        self.events.events()
    }

    pub fn stats(&self) -> MutationStats {
        self.stats
    }

    /// Consume the context, returning its events and counters
    pub fn finish(self) -> (Vec<ServiceEvent>, MutationStats) {
        (self.events.into_events(), self.stats)
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Create an entity and match it against every policy selecting its type
    pub fn create_entity(
        &mut self,
        entity_type: EntityType,
        mut entity: TaggedEntity,
    ) -> Result<TaggedEntity> {
        if self.tx.entity_exists(entity_type, &entity.id) {
            return Err(CoreError::already_exists(entity_type, entity.id).into());
        }
        entity.role_attributes = validate_role_attributes(&entity.role_attributes)?;

        self.tx.put_entity(entity_type, entity.clone())?;
        debug!(entity_type = %entity_type, id = %entity.id, "entity created");

        // runs even with no tags: wildcard policies match every new entity
        self.reevaluate_entity(entity_type, &entity.id, Some(entity.role_attributes.as_slice()))?;
        Ok(entity)
    }

    /// Update an entity's name and role attributes
    pub fn update_entity(
        &mut self,
        entity_type: EntityType,
        mut entity: TaggedEntity,
    ) -> Result<TaggedEntity> {
        let existing = self
            .tx
            .entity(entity_type, &entity.id)
            .ok_or_else(|| CoreError::not_found(entity_type, entity.id.clone()))?;

        entity.role_attributes = validate_role_attributes(&entity.role_attributes)?;
        entity.created_at = existing.created_at;
        entity.updated_at = Utc::now();

        self.tx.put_entity(entity_type, entity.clone())?;
        self.on_entity_tags_changed(
            entity_type,
            &entity.id,
            &existing.role_attributes,
            &entity.role_attributes,
        )?;
        Ok(entity)
    }

    /// Delete an entity, its references and every link it takes part in
    pub fn delete_entity(&mut self, entity_type: EntityType, id: &str) -> Result<TaggedEntity> {
        if !self.tx.entity_exists(entity_type, id) {
            return Err(CoreError::not_found(entity_type, id).into());
        }
        self.on_entity_deleted(entity_type, id)?;
        let deleted = self.tx.delete_entity(entity_type, id)?;
        debug!(entity_type = %entity_type, id = %id, "entity deleted");
        Ok(deleted)
    }

    // ========================================================================
    // Policies
    // ========================================================================

    /// Create a policy and link it to everything its role sets select
    pub fn create_policy(&mut self, mut policy: Policy) -> Result<Policy> {
        if self.tx.policy(policy.policy_type, &policy.id).is_some() {
            return Err(CoreError::already_exists(policy.policy_type, policy.id).into());
        }
        policy.roles = self.normalize_roles(policy.policy_type, &policy.roles)?;

        self.tx.put_policy(policy.clone())?;
        debug!(policy_type = %policy.policy_type, id = %policy.id, "policy created");

        for side in policy.policy_type.sides() {
            self.evaluate_policy_side(&policy, *side)?;
        }
        Ok(policy)
    }

    /// Replace a policy's name, semantic, kind and role sets
    ///
    /// A semantic or kind change unlinks every side under the old definition
    /// before re-linking under the new one.
    pub fn update_policy(&mut self, mut policy: Policy) -> Result<Policy> {
        let existing = self
            .tx
            .policy(policy.policy_type, &policy.id)
            .ok_or_else(|| CoreError::not_found(policy.policy_type, policy.id.clone()))?;

        policy.roles = self.normalize_roles(policy.policy_type, &policy.roles)?;
        policy.created_at = existing.created_at;
        policy.updated_at = Utc::now();
        self.tx.put_policy(policy.clone())?;

        let sides = policy.policy_type.sides();
        if existing.semantic != policy.semantic || existing.kind != policy.kind {
            debug!(
                id = %policy.id,
                semantic = %policy.semantic,
                kind = %policy.kind,
                "policy definition changed, relinking all sides"
            );
            for side in sides {
                self.unlink_policy_side(&existing, *side)?;
            }
            for side in sides {
                self.evaluate_policy_side(&policy, *side)?;
            }
        } else {
            for side in sides {
                if existing.role_set(*side) != policy.role_set(*side) {
                    self.evaluate_policy_side(&policy, *side)?;
                }
            }
        }
        Ok(policy)
    }

    /// Delete a policy after clearing its role sets
    pub fn delete_policy(&mut self, policy_type: PolicyType, id: &str) -> Result<Policy> {
        let mut policy = self
            .tx
            .policy(policy_type, id)
            .ok_or_else(|| CoreError::not_found(policy_type, id))?;
        let original = policy.clone();

        policy.roles.clear();
        self.tx.put_policy(policy.clone())?;
        for side in policy_type.sides() {
            self.evaluate_policy_side(&policy, *side)?;
        }

        self.tx.delete_policy(policy_type, id)?;
        debug!(policy_type = %policy_type, id = %id, "policy deleted");
        Ok(original)
    }

    // ========================================================================
    // Change notifications
    // ========================================================================

    /// An entity's tags changed from `old_tags` to `new_tags`
    ///
    /// A no-op when the tag sets are equal. An entity missing from the store
    /// is treated as matching nothing.
    pub fn on_entity_tags_changed(
        &mut self,
        entity_type: EntityType,
        id: &str,
        old_tags: &[String],
        new_tags: &[String],
    ) -> Result<()> {
        if same_tags(old_tags, new_tags) {
            return Ok(());
        }
        let exists = self.tx.entity_exists(entity_type, id);
        self.reevaluate_entity(entity_type, id, exists.then_some(new_tags))
    }

    /// A policy side's role set changed from `old_role_set` to `new_role_set`
    ///
    /// The new role set is normalized and stored, then the side's match set is
    /// recomputed.
    pub fn on_policy_role_set_changed(
        &mut self,
        policy_type: PolicyType,
        policy_id: &str,
        side: EntityType,
        old_role_set: &[String],
        new_role_set: &[String],
    ) -> Result<()> {
        if !policy_type.has_side(side) {
            return Err(PolicyError::InvalidInput(format!(
                "{} has no {} side",
                policy_type, side
            )));
        }
        let mut policy = self
            .tx
            .policy(policy_type, policy_id)
            .ok_or_else(|| CoreError::not_found(policy_type, policy_id))?;

        let normalized = normalize_role_set(&*self.tx, side, new_role_set)?;
        if old_role_set == normalized.as_slice() && policy.role_set(side) == normalized.as_slice() {
            return Ok(());
        }

        if policy.role_set(side) != normalized.as_slice() {
            policy.roles.insert(side, normalized);
            policy.updated_at = Utc::now();
            self.tx.put_policy(policy.clone())?;
        }
        self.evaluate_policy_side(&policy, side)
    }

    /// An entity is being deleted: strip references to it, then unlink it everywhere
    pub fn on_entity_deleted(&mut self, entity_type: EntityType, id: &str) -> Result<()> {
        let cleaned = self.delete_entity_references(entity_type, id)?;
        if cleaned > 0 {
            debug!(entity_type = %entity_type, id = %id, policies = cleaned, "removed explicit references");
        }
        self.reevaluate_entity(entity_type, id, None)
    }

    fn normalize_roles(
        &self,
        policy_type: PolicyType,
        roles: &BTreeMap<EntityType, Vec<String>>,
    ) -> Result<BTreeMap<EntityType, Vec<String>>> {
        let mut normalized = BTreeMap::new();
        for (side, role_set) in roles {
            if !policy_type.has_side(*side) {
                return Err(PolicyError::InvalidInput(format!(
                    "{} has no {} side ({})",
                    policy_type,
                    side,
                    side.role_field()
                )));
            }
            normalized.insert(*side, normalize_role_set(&*self.tx, *side, role_set)?);
        }
        Ok(normalized)
    }
}

fn same_tags(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}
