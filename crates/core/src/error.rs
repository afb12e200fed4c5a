//! Shared error model.

use thiserror::Error;

/// Result type used across the core layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Core-level error.
///
/// Keep this focused on deterministic input failures (parsing, validation).
/// Authorization outcomes are not errors at this layer; they are decisions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed configuration).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
