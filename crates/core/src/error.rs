//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are raised at the administrative boundary and are user-correctable.
/// They never originate from the per-request authorization path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A rule, permission key or role does not exist (or is retired).
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness among active rows was violated.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Two active siblings would share the same ordering value.
    #[error("ordering invalid: {0}")]
    OrderingInvalid(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    pub fn ordering(msg: impl Into<String>) -> Self {
        Self::OrderingInvalid(msg.into())
    }

    /// Stable machine-readable code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidId(_) => "invalid_id",
            Self::NotFound(_) => "not_found",
            Self::Duplicate(_) => "duplicate",
            Self::OrderingInvalid(_) => "ordering_invalid",
        }
    }
}
