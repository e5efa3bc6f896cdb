//! Service-boundary error model.
//!
//! Domain errors and store errors keep their kind when they cross into
//! services; anything unexpected becomes [`InventoryError::Internal`], whose
//! cause is logged but never rendered to callers.

use gascyl_core::DomainError;
use thiserror::Error;

use crate::store::StoreError;

pub type InventoryResult<T> = Result<T, InventoryError>;

/// Stable error classification for the (external) transport layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    DatabaseError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::DatabaseError | ErrorKind::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl InventoryError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Wrap an unexpected failure. The cause is logged here and hidden from `Display`.
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        tracing::error!(error = ?err, "unexpected inventory failure");
        Self::Internal(err)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::NotFound(_) => ErrorKind::NotFound,
            InventoryError::BadRequest(_) => ErrorKind::BadRequest,
            InventoryError::Conflict(_) => ErrorKind::Conflict,
            InventoryError::Database(_) => ErrorKind::DatabaseError,
            InventoryError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }
}

impl From<DomainError> for InventoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => InventoryError::BadRequest(msg),
            err @ DomainError::NotFound(_) => InventoryError::NotFound(err.to_string()),
            DomainError::Conflict(msg) => InventoryError::Conflict(msg),
        }
    }
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => InventoryError::Conflict(msg),
            StoreError::Database(msg) => InventoryError::Database(msg),
            StoreError::Decode(msg) => InventoryError::Database(format!("corrupt row: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_kind() {
        let cases = [
            (DomainError::validation("bad qty"), ErrorKind::BadRequest),
            (DomainError::invalid_id("nope"), ErrorKind::BadRequest),
            (DomainError::not_found("category x"), ErrorKind::NotFound),
            (DomainError::conflict("in use"), ErrorKind::Conflict),
        ];
        for (domain, kind) in cases {
            assert_eq!(InventoryError::from(domain).kind(), kind);
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(InventoryError::not_found("x").status_code(), 404);
        assert_eq!(InventoryError::bad_request("x").status_code(), 400);
        assert_eq!(InventoryError::conflict("x").status_code(), 409);
        assert_eq!(InventoryError::from(StoreError::Database("down".into())).status_code(), 500);
    }

    #[test]
    fn internal_hides_cause() {
        let err = InventoryError::internal(anyhow::anyhow!("secret connection string"));
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(err.kind().as_str(), "INTERNAL");
    }
}
