//! Wire protocol error types.

use thiserror::Error;
use tributary_types::EventError;
use uuid::Uuid;

/// Result type for wire protocol operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur during wire protocol operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame length prefix exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// Frame is shorter than its header, or shorter than its length prefix.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Command byte does not name a known command.
    ///
    /// The frame has been consumed; `correlation_id` identifies the request
    /// it answers.
    #[error("unknown command 0x{code:02x} (correlation id {correlation_id})")]
    UnknownCommand { code: u8, correlation_id: Uuid },

    /// Credentials block is malformed or too long to encode.
    #[error("invalid credentials block: {0}")]
    InvalidCredentials(String),

    /// Header was readable but the rest of the body was not.
    ///
    /// The frame has been consumed; `correlation_id` identifies the request
    /// it answers.
    #[error("malformed frame body (correlation id {correlation_id}): {reason}")]
    MalformedBody { correlation_id: Uuid, reason: String },

    /// Protobuf payload could not be decoded.
    #[error("payload decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Event record or event could not be converted.
    #[error(transparent)]
    Event(#[from] EventError),
}
