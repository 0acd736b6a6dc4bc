//! Tag-change hook registry
//!
//! Each taggable entity type is bound, once at engine construction, to the
//! policy sides that select it. A tag change on an entity re-evaluates exactly
//! those sides.

use overlay_core::{EntityType, PolicyType};
use std::collections::HashMap;

/// One policy side selecting an entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyBinding {
    pub policy_type: PolicyType,
    pub side: EntityType,
}

/// Entity type -> policy sides to re-evaluate when its tags change
#[derive(Debug, Clone, Default)]
pub struct TagChangeHooks {
    bindings: HashMap<EntityType, Vec<PolicyBinding>>,
}

impl TagChangeHooks {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry binding every policy side to its entity type
    pub fn standard() -> Self {
        let mut hooks = Self::new();
        for policy_type in PolicyType::ALL {
            for side in policy_type.sides() {
                hooks.register(*side, policy_type);
            }
        }
        hooks
    }

    /// Bind `policy_type`'s `side` to tag changes of that entity type
    pub fn register(&mut self, side: EntityType, policy_type: PolicyType) {
        let binding = PolicyBinding { policy_type, side };
        let bindings = self.bindings.entry(side).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }

    /// Policy sides bound to an entity type
    pub fn bindings(&self, entity_type: EntityType) -> &[PolicyBinding] {
        self.bindings
            .get(&entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
