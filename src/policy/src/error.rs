//! Error types for the policy engine

use overlay_core::CoreError;
use thiserror::Error;

/// Policy engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Role-set entry without a `#` or `@` prefix that is not the wildcard
    #[error("{field}: invalid role '{role}', expected #tag, @id or all")]
    InvalidRoleFormat { field: String, role: String },

    /// Wildcard mixed with other entries
    #[error("{field}: 'all' must be the only entry in a role set")]
    WildcardMustBeExclusive { field: String },

    /// Explicit references that resolve to no entity
    #[error("{field}: no {entity_type} found for {}", .refs.join(", "))]
    ReferenceNotFound {
        field: String,
        entity_type: String,
        refs: Vec<String>,
    },

    /// Entity role attribute that is empty or carries a role prefix
    #[error("{field}: invalid role attribute '{value}'")]
    InvalidRoleAttribute { field: String, value: String },

    /// Unknown policy semantic
    #[error("semantic: invalid value '{0}', expected AllOf or AnyOf")]
    InvalidSemantic(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A decrement would take a ref count below zero
    #[error("{collection}: ref count for {source_id} <-> {target_id} would go negative")]
    NegativeRefCount {
        collection: String,
        source_id: String,
        target_id: String,
    },

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Store error, propagated unchanged
    #[error("Store error: {0}")]
    Store(#[from] CoreError),
}

impl PolicyError {
    /// Field the error refers to, for field-level rejection messages
    pub fn field(&self) -> Option<&str> {
        match self {
            PolicyError::InvalidRoleFormat { field, .. }
            | PolicyError::WildcardMustBeExclusive { field }
            | PolicyError::ReferenceNotFound { field, .. }
            | PolicyError::InvalidRoleAttribute { field, .. } => Some(field),
            PolicyError::InvalidSemantic(_) => Some("semantic"),
            _ => None,
        }
    }

    /// Whether the error is a rejected write rather than an invariant or store failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PolicyError::InvalidRoleFormat { .. }
                | PolicyError::WildcardMustBeExclusive { .. }
                | PolicyError::ReferenceNotFound { .. }
                | PolicyError::InvalidRoleAttribute { .. }
                | PolicyError::InvalidSemantic(_)
                | PolicyError::InvalidInput(_)
                | PolicyError::Store(CoreError::NameInUse { .. })
                | PolicyError::Store(CoreError::AlreadyExists { .. })
        )
    }
}

/// Result type for policy engine operations
pub type Result<T> = std::result::Result<T, PolicyError>;
