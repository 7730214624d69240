//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures of caller input (validation,
/// malformed identifiers). Execution and infrastructure failures belong to the
/// engine crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. empty prompt).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A catalogue lookup (model, quality mode) did not match anything known.
    #[error("unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Unknown {
            kind,
            value: value.into(),
        }
    }
}
