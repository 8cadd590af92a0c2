//! Domain error model.

use core::convert::Infallible;

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic configuration and validation failures
/// (bad queue classification, empty names). Broker and transport concerns
/// belong to `peril-events`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A queue classification outside `{durable, transient}` was supplied.
    #[error("invalid queue kind: {0}")]
    InvalidQueueKind(String),

    /// A value failed validation (e.g. an empty queue name).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn invalid_queue_kind(value: impl Into<String>) -> Self {
        Self::InvalidQueueKind(value.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

// Lets `QueueKind` itself flow through `TryInto<QueueKind>` bounds.
impl From<Infallible> for DomainError {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}
