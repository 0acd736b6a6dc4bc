//! Candidate Resolver
//!
//! Turns role sets into entity ids: normalizing references at write time and
//! producing a policy side's full match set when its role set changes.

use crate::error::{PolicyError, Result};
use crate::roles::{classify, entity_ref, ClassifiedRoles};
use overlay_core::{EntityId, EntityType, ReadTx, Semantic};
use std::collections::BTreeSet;
use tracing::trace;

/// Normalize a role set written to the `side` of a policy
///
/// `@name` references are resolved to ids; references that match neither an id
/// nor a name fail the write with every unresolvable entry listed.
pub fn normalize_role_set<T: ReadTx + ?Sized>(
    tx: &T,
    side: EntityType,
    role_set: &[String],
) -> Result<Vec<String>> {
    let field = side.role_field();
    let mut classified = classify(field, role_set)?;

    let mut resolved = BTreeSet::new();
    let mut missing = Vec::new();
    for reference in &classified.ids {
        if tx.entity_exists(side, reference) {
            resolved.insert(reference.clone());
        } else if let Some(id) = tx.entity_id_by_name(side, reference) {
            trace!(side = %side, name = %reference, id = %id, "resolved reference by name");
            resolved.insert(id);
        } else {
            missing.push(entity_ref(reference));
        }
    }

    if !missing.is_empty() {
        return Err(PolicyError::ReferenceNotFound {
            field: field.to_string(),
            entity_type: side.singular().to_string(),
            refs: missing,
        });
    }

    classified.ids = resolved;
    Ok(classified.to_role_set())
}

/// Ids of every `side` entity currently matching a classified role set
///
/// Explicit references are checked for existence; dangling ones are skipped.
pub fn resolve_candidates<T: ReadTx + ?Sized>(
    tx: &T,
    side: EntityType,
    semantic: Semantic,
    roles: &ClassifiedRoles,
) -> BTreeSet<EntityId> {
    if roles.wildcard {
        return tx.entity_ids(side).into_iter().collect();
    }

    let mut candidates: BTreeSet<EntityId> = roles
        .ids
        .iter()
        .filter(|id| tx.entity_exists(side, id))
        .cloned()
        .collect();

    if !roles.tags.is_empty() {
        candidates.extend(tx.tag_index_cursor(side, &roles.tag_list(), semantic));
    }

    candidates
}
