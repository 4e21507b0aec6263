use crate::record::RecordId;
use thiserror::Error;

/// Errors produced by the proximity search core.
///
/// The variants split into caller errors ([`InvalidQuery`], [`InvalidCoordinate`],
/// [`NotFound`]), programming-error signals ([`DuplicateIdentifier`]) and
/// possibly transient failures of a collaborator ([`Failure`], [`Io`], [`Lock`]).
///
/// An empty search result is never an error.
///
/// [`InvalidQuery`]: NearbiteError::InvalidQuery
/// [`InvalidCoordinate`]: NearbiteError::InvalidCoordinate
/// [`NotFound`]: NearbiteError::NotFound
/// [`DuplicateIdentifier`]: NearbiteError::DuplicateIdentifier
/// [`Failure`]: NearbiteError::Failure
/// [`Io`]: NearbiteError::Io
/// [`Lock`]: NearbiteError::Lock
#[derive(Debug, Error)]
pub enum NearbiteError {
    /// Malformed distance or center parameters
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A coordinate outside the valid longitude/latitude range, or not finite
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// Referenced identifier is absent
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// Identifier already present in the spatial index
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(RecordId),

    /// Underlying store or index operation failed
    #[error("operation failed: {0}")]
    Failure(String),

    /// Lock acquisition failed (poisoned)
    #[error("failed to acquire lock: {0}")]
    Lock(String),

    /// I/O error from the persistence layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error with context
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NearbiteError {
    /// True for errors caused by the request itself. These are never worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            NearbiteError::InvalidQuery(_)
                | NearbiteError::InvalidCoordinate(_)
                | NearbiteError::NotFound(_)
        )
    }
}

/// Result type alias for nearbite operations
pub type Result<T> = std::result::Result<T, NearbiteError>;
