//! # tributary-types: Event model for the `Tributary` client
//!
//! This crate contains the types shared by the wire codec and the client:
//! - The identifier codec ([`uuid_codec`]) for the server's GUID byte order
//! - The event model ([`Event`], [`EventData`], [`EventMetadata`])
//! - Wire-decoded records ([`RawEventRecord`], [`ContentType`])
//! - Stream positions ([`StreamPosition`], [`ExpectedVersion`], [`ReadDirection`])

use std::fmt::{self, Display};

mod error;
mod event;
mod raw;
pub mod uuid_codec;

#[cfg(test)]
mod tests;

pub use error::{EventError, EventResult};
pub use event::{CORRELATION_ID_KEY, Event, EventData, EventMetadata, Metadata};
pub use raw::{ContentType, RawEventRecord};

// ============================================================================
// Stream Positions
// ============================================================================

/// Position of an event within a stream, used as the start of a read.
///
/// Event numbers are zero-indexed. [`StreamPosition::END`] is a sentinel
/// meaning "the last event", valid only for backward reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamPosition(i64);

impl StreamPosition {
    /// The first event of a stream.
    pub const START: StreamPosition = StreamPosition(0);

    /// The last event of a stream.
    pub const END: StreamPosition = StreamPosition(-1);

    pub fn new(position: i64) -> Self {
        Self(position)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn is_end(&self) -> bool {
        *self == Self::END
    }
}

impl Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            write!(f, "end")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i64> for StreamPosition {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<StreamPosition> for i64 {
    fn from(position: StreamPosition) -> Self {
        position.0
    }
}

/// Direction of a slice read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDirection {
    Forward,
    Backward,
}

impl Display for ReadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadDirection::Forward => write!(f, "forward"),
            ReadDirection::Backward => write!(f, "backward"),
        }
    }
}

// ============================================================================
// Expected Version
// ============================================================================

/// Optimistic concurrency check applied when appending to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExpectedVersion {
    /// Append regardless of the stream's current version.
    #[default]
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must exist.
    StreamExists,
    /// The stream's last event number must equal this value.
    Exact(i64),
}

impl ExpectedVersion {
    /// Returns the value sent on the wire.
    pub fn as_i64(&self) -> i64 {
        match self {
            ExpectedVersion::Any => -2,
            ExpectedVersion::NoStream => -1,
            ExpectedVersion::StreamExists => -4,
            ExpectedVersion::Exact(version) => *version,
        }
    }
}

impl Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::StreamExists => write!(f, "stream exists"),
            ExpectedVersion::Exact(version) => write!(f, "{version}"),
        }
    }
}
