//! Command codes and frame flags.

use std::fmt::{self, Display};

/// Command carried in the first byte of every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TcpCommand {
    HeartbeatRequest = 0x01,
    HeartbeatResponse = 0x02,
    Ping = 0x03,
    Pong = 0x04,

    WriteEvents = 0x82,
    WriteEventsCompleted = 0x83,

    ReadEvent = 0xB0,
    ReadEventCompleted = 0xB1,
    ReadStreamEventsForward = 0xB2,
    ReadStreamEventsForwardCompleted = 0xB3,
    ReadStreamEventsBackward = 0xB4,
    ReadStreamEventsBackwardCompleted = 0xB5,

    BadRequest = 0xF0,
    NotHandled = 0xF1,
    Authenticate = 0xF2,
    Authenticated = 0xF3,
    NotAuthenticated = 0xF4,
    IdentifyClient = 0xF5,
    ClientIdentified = 0xF6,
}

impl TcpCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns true for liveness traffic that never reaches a pending operation.
    pub fn is_heartbeat(self) -> bool {
        matches!(
            self,
            TcpCommand::HeartbeatRequest
                | TcpCommand::HeartbeatResponse
                | TcpCommand::Ping
                | TcpCommand::Pong
        )
    }
}

impl TryFrom<u8> for TcpCommand {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        let command = match code {
            0x01 => TcpCommand::HeartbeatRequest,
            0x02 => TcpCommand::HeartbeatResponse,
            0x03 => TcpCommand::Ping,
            0x04 => TcpCommand::Pong,
            0x82 => TcpCommand::WriteEvents,
            0x83 => TcpCommand::WriteEventsCompleted,
            0xB0 => TcpCommand::ReadEvent,
            0xB1 => TcpCommand::ReadEventCompleted,
            0xB2 => TcpCommand::ReadStreamEventsForward,
            0xB3 => TcpCommand::ReadStreamEventsForwardCompleted,
            0xB4 => TcpCommand::ReadStreamEventsBackward,
            0xB5 => TcpCommand::ReadStreamEventsBackwardCompleted,
            0xF0 => TcpCommand::BadRequest,
            0xF1 => TcpCommand::NotHandled,
            0xF2 => TcpCommand::Authenticate,
            0xF3 => TcpCommand::Authenticated,
            0xF4 => TcpCommand::NotAuthenticated,
            0xF5 => TcpCommand::IdentifyClient,
            0xF6 => TcpCommand::ClientIdentified,
            other => return Err(other),
        };
        Ok(command)
    }
}

impl Display for TcpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}(0x{:02x})", self.code())
    }
}

/// Flag bitmask carried in the second byte of every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const NONE: TcpFlags = TcpFlags(0x00);

    /// A credentials block follows the correlation id.
    pub const AUTHENTICATED: TcpFlags = TcpFlags(0x01);

    pub const TRUSTED_WRITE: TcpFlags = TcpFlags(0x02);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: TcpFlags) -> Self {
        Self(self.0 | other.0)
    }
}
