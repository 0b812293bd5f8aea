//! Protobuf payloads carried inside frames.
//!
//! These mirror the server's proto2 client message schema. Field tags are
//! part of the wire contract and must not change.

use bytes::Bytes;
use tributary_types::{ContentType, Event, RawEventRecord, uuid_codec};

use crate::error::WireResult;

// ============================================================================
// Event Records
// ============================================================================

/// An event to be written.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NewEvent {
    #[prost(bytes = "bytes", required, tag = "1")]
    pub event_id: Bytes,
    #[prost(string, required, tag = "2")]
    pub event_type: String,
    #[prost(int32, required, tag = "3")]
    pub data_content_type: i32,
    #[prost(int32, required, tag = "4")]
    pub metadata_content_type: i32,
    #[prost(bytes = "bytes", required, tag = "5")]
    pub data: Bytes,
    #[prost(bytes = "bytes", optional, tag = "6")]
    pub metadata: Option<Bytes>,
}

impl NewEvent {
    /// Builds the write payload for an event.
    pub fn from_event(event: &Event) -> WireResult<Self> {
        Ok(Self {
            event_id: Bytes::copy_from_slice(&uuid_codec::uuid_to_bytes(event.id())),
            event_type: event.name().to_string(),
            data_content_type: event.data().content_type().as_i32(),
            metadata_content_type: event.metadata_content_type().as_i32(),
            data: event.data().to_bytes()?,
            metadata: event.metadata_bytes()?,
        })
    }
}

/// An event as stored on the server.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventRecord {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub event_number: i64,
    #[prost(bytes = "bytes", required, tag = "3")]
    pub event_id: Bytes,
    #[prost(string, required, tag = "4")]
    pub event_type: String,
    #[prost(int32, required, tag = "5")]
    pub data_content_type: i32,
    #[prost(int32, required, tag = "6")]
    pub metadata_content_type: i32,
    #[prost(bytes = "bytes", required, tag = "7")]
    pub data: Bytes,
    #[prost(bytes = "bytes", optional, tag = "8")]
    pub metadata: Option<Bytes>,
    #[prost(int64, optional, tag = "9")]
    pub created: Option<i64>,
    #[prost(int64, optional, tag = "10")]
    pub created_epoch: Option<i64>,
}

impl EventRecord {
    /// Converts to the transport-independent record the event model decodes.
    pub fn to_raw(&self) -> WireResult<RawEventRecord> {
        Ok(RawEventRecord {
            event_type: self.event_type.clone(),
            event_stream_id: self.event_stream_id.clone(),
            event_number: self.event_number,
            event_id: self.event_id.clone(),
            data_content_type: ContentType::try_from(self.data_content_type)?,
            metadata_content_type: ContentType::try_from(self.metadata_content_type)?,
            data: self.data.clone(),
            metadata: self.metadata.clone(),
            created: self.created,
            created_epoch: self.created_epoch,
        })
    }
}

/// An event slot in a read reply: the event itself, and the link record when
/// the event was reached through a link.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ResolvedIndexedEvent {
    #[prost(message, optional, tag = "1")]
    pub event: Option<EventRecord>,
    #[prost(message, optional, tag = "2")]
    pub link: Option<EventRecord>,
}

impl ResolvedIndexedEvent {
    /// Returns the resolved event, falling back to the link record when the
    /// link target is gone.
    pub fn record(&self) -> Option<&EventRecord> {
        self.event.as_ref().or(self.link.as_ref())
    }
}

// ============================================================================
// Write
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OperationResult {
    Success = 0,
    PrepareTimeout = 1,
    CommitTimeout = 2,
    ForwardTimeout = 3,
    WrongExpectedVersion = 4,
    StreamDeleted = 5,
    InvalidTransaction = 6,
    AccessDenied = 7,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteEvents {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub expected_version: i64,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<NewEvent>,
    #[prost(bool, required, tag = "4")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteEventsCompleted {
    #[prost(enumeration = "OperationResult", required, tag = "1")]
    pub result: i32,
    #[prost(string, optional, tag = "2")]
    pub message: Option<String>,
    #[prost(int64, required, tag = "3")]
    pub first_event_number: i64,
    #[prost(int64, required, tag = "4")]
    pub last_event_number: i64,
    #[prost(int64, optional, tag = "5")]
    pub prepare_position: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub commit_position: Option<i64>,
    #[prost(int64, optional, tag = "7")]
    pub current_version: Option<i64>,
}

// ============================================================================
// Read Event
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ReadEventResult {
    Success = 0,
    NotFound = 1,
    NoStream = 2,
    StreamDeleted = 3,
    Error = 4,
    AccessDenied = 5,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadEvent {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub event_number: i64,
    #[prost(bool, required, tag = "3")]
    pub resolve_link_tos: bool,
    #[prost(bool, required, tag = "4")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadEventCompleted {
    #[prost(enumeration = "ReadEventResult", required, tag = "1")]
    pub result: i32,
    #[prost(message, optional, tag = "2")]
    pub event: Option<ResolvedIndexedEvent>,
    #[prost(string, optional, tag = "3")]
    pub error: Option<String>,
}

// ============================================================================
// Read Stream Slice
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ReadStreamResult {
    Success = 0,
    NoStream = 1,
    StreamDeleted = 2,
    NotModified = 3,
    Error = 4,
    AccessDenied = 5,
}

/// Request for one slice of a stream. The command code selects the direction.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadStreamEvents {
    #[prost(string, required, tag = "1")]
    pub event_stream_id: String,
    #[prost(int64, required, tag = "2")]
    pub from_event_number: i64,
    #[prost(int32, required, tag = "3")]
    pub max_count: i32,
    #[prost(bool, required, tag = "4")]
    pub resolve_link_tos: bool,
    #[prost(bool, required, tag = "5")]
    pub require_master: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadStreamEventsCompleted {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<ResolvedIndexedEvent>,
    #[prost(enumeration = "ReadStreamResult", required, tag = "2")]
    pub result: i32,
    #[prost(int64, required, tag = "3")]
    pub next_event_number: i64,
    #[prost(int64, required, tag = "4")]
    pub last_event_number: i64,
    #[prost(bool, required, tag = "5")]
    pub is_end_of_stream: bool,
    #[prost(int64, required, tag = "6")]
    pub last_commit_position: i64,
    #[prost(string, optional, tag = "7")]
    pub error: Option<String>,
}

// ============================================================================
// Session Control
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum NotHandledReason {
    NotReady = 0,
    TooBusy = 1,
    NotMaster = 2,
}

/// Server refused to process a request; the request may be retried.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NotHandled {
    #[prost(enumeration = "NotHandledReason", required, tag = "1")]
    pub reason: i32,
    #[prost(bytes = "bytes", optional, tag = "2")]
    pub additional_info: Option<Bytes>,
}

/// Announces the client's protocol version and connection name.
#[derive(Clone, PartialEq, prost::Message)]
pub struct IdentifyClient {
    #[prost(int32, required, tag = "1")]
    pub version: i32,
    #[prost(string, optional, tag = "2")]
    pub connection_name: Option<String>,
}

/// Protocol version announced in [`IdentifyClient`].
pub const CLIENT_VERSION: i32 = 1;
