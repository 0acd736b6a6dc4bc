//! Reference Cleanup
//!
//! Strips `@id` references to a deleted entity from every policy role set that
//! names it. Each stripped role set goes through normal role-set processing.

use crate::context::MutationContext;
use crate::error::Result;
use crate::roles::entity_ref;
use chrono::Utc;
use overlay_core::{EntityType, PolicyType, WriteTx};
use tracing::trace;

impl<'a, T: WriteTx + ?Sized> MutationContext<'a, T> {
    /// Remove explicit references to an entity; returns how many policies changed
    pub(crate) fn delete_entity_references(
        &mut self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<usize> {
        let reference = entity_ref(entity_id);
        let mut changed = 0;

        for policy_type in PolicyType::ALL {
            if !policy_type.has_side(entity_type) {
                continue;
            }

            for policy_id in self.tx.policy_ids(policy_type) {
                let Some(mut policy) = self.tx.policy(policy_type, &policy_id) else {
                    continue;
                };
                let Some(role_set) = policy.roles.get_mut(&entity_type) else {
                    continue;
                };
                let before = role_set.len();
                role_set.retain(|role| role != &reference);
                if role_set.len() == before {
                    continue;
                }

                trace!(policy = %policy.id, reference = %reference, "stripping reference");
                policy.updated_at = Utc::now();
                self.tx.put_policy(policy.clone())?;
                self.evaluate_policy_side(&policy, entity_type)?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
