//! Semantic Evaluator
//!
//! The single match predicate shared by incremental maintenance and the
//! integrity checker.

use crate::error::{PolicyError, Result};
use crate::roles::ClassifiedRoles;
use overlay_core::Semantic;

/// Parse a semantic name case-insensitively
pub fn parse_semantic(value: &str) -> Result<Semantic> {
    value
        .parse()
        .map_err(|_| PolicyError::InvalidSemantic(value.to_string()))
}

/// Whether an entity with `entity_tags` matches a classified role set
///
/// Explicit references and the wildcard match regardless of tags. Tag roles
/// match under AllOf when every tag role is present and under AnyOf when at
/// least one is. An empty role set matches nothing.
pub fn matches(
    semantic: Semantic,
    roles: &ClassifiedRoles,
    entity_id: &str,
    entity_tags: &[String],
) -> bool {
    if roles.wildcard || roles.ids.contains(entity_id) {
        return true;
    }
    if roles.tags.is_empty() {
        return false;
    }

    match semantic {
        Semantic::AllOf => roles
            .tags
            .iter()
            .all(|tag| entity_tags.iter().any(|t| t == tag)),
        Semantic::AnyOf => entity_tags.iter().any(|t| roles.tags.contains(t)),
    }
}
