//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, missing references, conflicts). Storage failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier or enum literal could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The operation conflicts with existing state (e.g. delete blocked by references).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_entity() {
        let err = DomainError::not_found("category 42");
        assert_eq!(err.to_string(), "category 42 not found");
    }

    #[test]
    fn constructors_build_matching_variants() {
        assert!(matches!(DomainError::validation("x"), DomainError::Validation(_)));
        assert!(matches!(DomainError::invariant("x"), DomainError::InvariantViolation(_)));
        assert!(matches!(DomainError::conflict("x"), DomainError::Conflict(_)));
        assert!(matches!(DomainError::invalid_id("x"), DomainError::InvalidId(_)));
    }
}
