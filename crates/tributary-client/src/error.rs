//! Client error types.

use thiserror::Error;
use tributary_types::EventError;
use tributary_wire::WireError;
use uuid::Uuid;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket-level failure.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Malformed frame or payload.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Malformed reply content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Illegal operation: mutating a frozen event, or an internal invariant
    /// violation.
    #[error("operation error: {0}")]
    Operation(String),

    /// Invalid arguments, rejected before anything is sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No reply after all retries were spent.
    #[error("operation {correlation_id} timed out after {retries} retries")]
    Timeout { correlation_id: Uuid, retries: u32 },

    /// The connection was closed while the operation was pending.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The pending-operation queue is full.
    #[error("operation queue is full ({0} pending)")]
    QueueFull(usize),

    /// The stream does not exist.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The event does not exist in an existing stream.
    #[error("event {event_number} not found in stream {stream}")]
    EventNotFound { stream: String, event_number: i64 },

    /// The stream has been deleted.
    #[error("stream deleted: {0}")]
    StreamDeleted(String),

    /// Optimistic concurrency check failed on append.
    #[error("wrong expected version for stream {stream}: expected {expected}, current {current:?}")]
    WrongExpectedVersion {
        stream: String,
        expected: String,
        current: Option<i64>,
    },

    /// The server refused access to the stream.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The server rejected the configured credentials.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// The server could not handle the request and retries were spent.
    #[error("request not handled by server: {0}")]
    NotHandled(String),

    /// The server reported an error.
    #[error("server error: {0}")]
    Server(String),

    /// Reply command did not match the request.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },
}

impl ClientError {
    /// Creates a connection-closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed(reason.into())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true for malformed frames, payloads and records.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Wire(_) | Self::Protocol(_) | Self::UnexpectedResponse { .. }
        )
    }

    /// Returns true when the target stream or event does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound(_) | Self::EventNotFound { .. })
    }
}

impl From<EventError> for ClientError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::Protocol(message) => Self::Protocol(message),
            EventError::Frozen { .. } => Self::Operation(e.to_string()),
            EventError::Validation(message) => Self::Validation(message),
        }
    }
}
