//! Store error types
//!
//! Errors raised by the transactional store. The policy engine propagates these
//! unchanged; retrying a conflicted transaction is the caller's decision.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for the overlay store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Entity or policy does not exist
    #[error("{entity_type} not found with id {id}")]
    NotFound { entity_type: String, id: String },

    /// Entity or policy with the same id already exists
    #[error("{entity_type} already exists with id {id}")]
    AlreadyExists { entity_type: String, id: String },

    /// Name is already used by another row of the same type
    #[error("{entity_type} name '{name}' is already in use")]
    NameInUse { entity_type: String, name: String },

    /// A ref-counted link would drop below zero
    #[error("{collection}: ref count for {source_id} <-> {target_id} cannot go below zero")]
    InvalidRefCount {
        collection: String,
        source_id: String,
        target_id: String,
    },

    /// Transaction could not be serialized against a concurrent writer
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Invalid input/state
    #[error("Invalid: {0}")]
    Invalid(String),

    /// Internal store failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a not-found error
    pub fn not_found(entity_type: impl ToString, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(entity_type: impl ToString, id: impl Into<String>) -> Self {
        CoreError::AlreadyExists {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }

    /// Create a name-in-use error
    pub fn name_in_use(entity_type: impl ToString, name: impl Into<String>) -> Self {
        CoreError::NameInUse {
            entity_type: entity_type.to_string(),
            name: name.into(),
        }
    }

    /// Create an invalid error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        CoreError::Invalid(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        CoreError::Internal(msg.into())
    }

    /// Whether the error means the addressed row is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::not_found("identity", "abc");
        assert_eq!(err.to_string(), "identity not found with id abc");
        assert!(err.is_not_found());

        let err = CoreError::name_in_use("service", "web");
        assert_eq!(err.to_string(), "service name 'web' is already in use");
        assert!(!err.is_not_found());
    }
}
