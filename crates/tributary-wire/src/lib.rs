//! # tributary-wire: Binary TCP protocol for `Tributary`
//!
//! This crate defines the framing and payloads used between the client and
//! the event store server.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬─────────┬───────┬────────────────┬──────────────┬───────────┐
//! │ Length   │ Command │ Flags │ Correlation Id │ Credentials  │  Payload  │
//! │ (4 B LE) │ (1 B)   │ (1 B) │ (16 B)         │ (optional)   │  (var)    │
//! └──────────┴─────────┴───────┴────────────────┴──────────────┴───────────┘
//! ```
//!
//! - **Length**: little-endian size of everything after the prefix
//! - **Command**: see [`TcpCommand`]
//! - **Flags**: bit 0 set when a credentials block follows
//! - **Correlation Id**: GUID byte order (see `tributary_types::uuid_codec`)
//! - **Credentials**: 1-byte length + login, 1-byte length + password
//! - **Payload**: protobuf message selected by the command

mod command;
mod error;
mod frame;
mod message;

pub use command::{TcpCommand, TcpFlags};
pub use error::{WireError, WireResult};
pub use frame::{
    Credentials, DEFAULT_MAX_FRAME_SIZE, Frame, HEADER_SIZE, LENGTH_PREFIX_SIZE,
    MAX_CREDENTIAL_LEN,
};
pub use message::{
    CLIENT_VERSION, EventRecord, IdentifyClient, NewEvent, NotHandled, NotHandledReason,
    OperationResult, ReadEvent, ReadEventCompleted, ReadEventResult, ReadStreamEvents,
    ReadStreamEventsCompleted, ReadStreamResult, ResolvedIndexedEvent, WriteEvents,
    WriteEventsCompleted,
};
