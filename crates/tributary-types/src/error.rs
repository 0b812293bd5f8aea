//! Event model error types.

use thiserror::Error;

/// Result type for event model operations.
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised while building, mutating, or decoding events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Malformed input coming off the wire (missing record, bad identifier,
    /// undecodable payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Attempt to mutate a frozen event.
    #[error("cannot change {field}: event is frozen")]
    Frozen { field: &'static str },

    /// Invalid arguments supplied by the caller.
    #[error("validation error: {0}")]
    Validation(String),
}

impl EventError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true for errors caused by mutating an immutable event.
    pub fn is_operation_error(&self) -> bool {
        matches!(self, Self::Frozen { .. })
    }
}
