//! Wire-decoded event records.

use bytes::Bytes;

use crate::error::{EventError, EventResult};

/// Encoding of an event's data or metadata bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ContentType {
    /// Opaque bytes.
    #[default]
    Raw = 0,
    /// JSON document.
    Structured = 1,
}

impl ContentType {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for ContentType {
    type Error = EventError;

    fn try_from(value: i32) -> EventResult<Self> {
        match value {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Structured),
            other => Err(EventError::protocol(format!("unknown content type {other}"))),
        }
    }
}

/// An event record exactly as the server returned it.
///
/// `metadata`, `created` and `created_epoch` are absent when the server did
/// not send them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventRecord {
    /// Event type name.
    pub event_type: String,
    /// Stream the event belongs to.
    pub event_stream_id: String,
    /// Position of the event within its stream.
    pub event_number: i64,
    /// Identifier in wire byte order.
    pub event_id: Bytes,
    /// Encoding of `data`.
    pub data_content_type: ContentType,
    /// Encoding of `metadata`.
    pub metadata_content_type: ContentType,
    /// Event payload.
    pub data: Bytes,
    /// Event metadata.
    pub metadata: Option<Bytes>,
    /// Creation time in server ticks.
    pub created: Option<i64>,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_epoch: Option<i64>,
}
