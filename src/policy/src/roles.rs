//! Role Reference Classifier
//!
//! Splits a policy role set into tag roles, explicit entity references and the
//! `all` wildcard. Pure parsing: nothing here touches the store.

use crate::error::{PolicyError, Result};
use std::collections::BTreeSet;

/// Wildcard role matching every entity of the side's type
pub const ALL_ROLE: &str = "all";

/// Prefix of tag roles
pub const TAG_PREFIX: char = '#';

/// Prefix of explicit entity references
pub const REF_PREFIX: char = '@';

/// Field used when validating entity role attributes
pub const ROLE_ATTRIBUTES_FIELD: &str = "roleAttributes";

/// A classified role set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedRoles {
    /// Tag roles without the `#` prefix
    pub tags: BTreeSet<String>,

    /// Explicit references without the `@` prefix
    pub ids: BTreeSet<String>,

    /// Whether the role set is the wildcard
    pub wildcard: bool,
}

impl ClassifiedRoles {
    /// Whether the role set can match nothing at all
    pub fn is_empty(&self) -> bool {
        !self.wildcard && self.tags.is_empty() && self.ids.is_empty()
    }

    /// Stored form: `["all"]` for the wildcard, else sorted `#tag` then `@id` entries
    pub fn to_role_set(&self) -> Vec<String> {
        if self.wildcard {
            return vec![ALL_ROLE.to_string()];
        }
        self.tags
            .iter()
            .map(|t| tag_role(t))
            .chain(self.ids.iter().map(|id| entity_ref(id)))
            .collect()
    }

    /// Tag roles as a slice-friendly vector for tag index lookups
    pub fn tag_list(&self) -> Vec<String> {
        self.tags.iter().cloned().collect()
    }
}

/// Whether a role entry is the wildcard
///
/// Bare `all` matches in any case. The legacy `#all` only matches exactly;
/// `#ALL` is an ordinary tag role.
pub fn is_wildcard(role: &str) -> bool {
    role.eq_ignore_ascii_case(ALL_ROLE) || role.strip_prefix(TAG_PREFIX) == Some(ALL_ROLE)
}

/// Classify a role set; `field` names the policy field in error messages
pub fn classify(field: &str, roles: &[String]) -> Result<ClassifiedRoles> {
    let mut classified = ClassifiedRoles::default();

    for role in roles {
        if is_wildcard(role) {
            classified.wildcard = true;
        } else if let Some(tag) = role.strip_prefix(TAG_PREFIX) {
            classified.tags.insert(tag.to_string());
        } else if let Some(id) = role.strip_prefix(REF_PREFIX) {
            classified.ids.insert(id.to_string());
        } else {
            return Err(PolicyError::InvalidRoleFormat {
                field: field.to_string(),
                role: role.clone(),
            });
        }
    }

    if classified.wildcard && (!classified.tags.is_empty() || !classified.ids.is_empty()) {
        return Err(PolicyError::WildcardMustBeExclusive {
            field: field.to_string(),
        });
    }

    Ok(classified)
}

/// Validate and normalize entity role attributes (sorted, deduplicated)
pub fn validate_role_attributes(attributes: &[String]) -> Result<Vec<String>> {
    let mut normalized = BTreeSet::new();
    for value in attributes {
        if value.is_empty() || value.starts_with(TAG_PREFIX) || value.starts_with(REF_PREFIX) {
            return Err(PolicyError::InvalidRoleAttribute {
                field: ROLE_ATTRIBUTES_FIELD.to_string(),
                value: value.clone(),
            });
        }
        normalized.insert(value.clone());
    }
    Ok(normalized.into_iter().collect())
}

/// `@id` reference to an entity
pub fn entity_ref(id: &str) -> String {
    format!("{}{}", REF_PREFIX, id)
}

/// `#tag` role
pub fn tag_role(tag: &str) -> String {
    format!("{}{}", TAG_PREFIX, tag)
}
