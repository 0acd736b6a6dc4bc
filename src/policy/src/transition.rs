//! Link Transition Processor
//!
//! Decides which first-hop links must flip. A role-set change recomputes the
//! policy side's whole match set and diffs it against the stored links; a tag
//! change re-evaluates one entity against every policy of the bound types.

use crate::context::MutationContext;
use crate::error::Result;
use crate::resolver::resolve_candidates;
use crate::roles::classify;
use crate::semantic::matches;
use overlay_core::{EntityType, LinkKey, Policy, WriteTx};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Membership change of one entity in one policy side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Matched,
    Unmatched,
}

impl<'a, T: WriteTx + ?Sized> MutationContext<'a, T> {
    /// Recompute a policy side's match set and apply the difference
    ///
    /// Removals are applied before additions.
    pub(crate) fn evaluate_policy_side(&mut self, policy: &Policy, side: EntityType) -> Result<()> {
        let roles = classify(side.role_field(), policy.role_set(side))?;
        let key = LinkKey::new(policy.policy_type, side);

        let target = resolve_candidates(&*self.tx, side, policy.semantic, &roles);
        let current: BTreeSet<String> = self
            .tx
            .linked_entities(key, &policy.id)
            .into_iter()
            .collect();

        let removed: Vec<&String> = current.difference(&target).collect();
        let added: Vec<&String> = target.difference(&current).collect();
        debug!(
            policy = %policy.id,
            link = %key,
            candidates = target.len(),
            removed = removed.len(),
            added = added.len(),
            "policy side re-evaluated"
        );

        for entity_id in removed {
            self.apply_transition(policy, side, entity_id, Transition::Unmatched)?;
        }
        for entity_id in added {
            self.apply_transition(policy, side, entity_id, Transition::Matched)?;
        }
        Ok(())
    }

    /// Unmatch every entity currently linked on a policy side
    pub(crate) fn unlink_policy_side(&mut self, policy: &Policy, side: EntityType) -> Result<()> {
        let key = LinkKey::new(policy.policy_type, side);
        for entity_id in self.tx.linked_entities(key, &policy.id) {
            self.apply_transition(policy, side, &entity_id, Transition::Unmatched)?;
        }
        Ok(())
    }

    /// Re-evaluate one entity against every policy side bound to its type
    ///
    /// `tags` is `None` when the entity is absent; an absent entity matches
    /// nothing, the wildcard included.
    pub(crate) fn reevaluate_entity(
        &mut self,
        entity_type: EntityType,
        entity_id: &str,
        tags: Option<&[String]>,
    ) -> Result<()> {
        let hooks = self.hooks;
        for binding in hooks.bindings(entity_type) {
            let key = LinkKey::new(binding.policy_type, binding.side);

            for policy_id in self.tx.policy_ids(binding.policy_type) {
                let Some(policy) = self.tx.policy(binding.policy_type, &policy_id) else {
                    continue;
                };

                let should_match = match tags {
                    Some(tags) => {
                        let roles = classify(binding.side.role_field(), policy.role_set(binding.side))?;
                        matches(policy.semantic, &roles, entity_id, tags)
                    }
                    None => false,
                };
                let is_linked = self.tx.is_linked(key, &policy.id, entity_id);
                trace!(policy = %policy.id, entity = %entity_id, should_match, is_linked, "entity evaluated");

                if should_match && !is_linked {
                    self.apply_transition(&policy, binding.side, entity_id, Transition::Matched)?;
                } else if !should_match && is_linked {
                    self.apply_transition(&policy, binding.side, entity_id, Transition::Unmatched)?;
                }
            }
        }
        Ok(())
    }
}
