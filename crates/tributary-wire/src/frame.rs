//! Frame encoding and decoding for the wire protocol.
//!
//! A frame is a little-endian length prefix followed by a body; the length
//! counts only the body.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use tributary_types::uuid_codec::{self, UUID_WIRE_LEN};

use crate::command::{TcpCommand, TcpFlags};
use crate::error::{WireError, WireResult};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the fixed body header (command + flags + correlation id).
pub const HEADER_SIZE: usize = 2 + UUID_WIRE_LEN;

/// Default maximum body size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Longest login or password the one-byte length field can describe.
pub const MAX_CREDENTIAL_LEN: usize = u8::MAX as usize;

// ============================================================================
// Credentials
// ============================================================================

/// Username and password sent with authenticated frames.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn encoded_len(&self) -> usize {
        2 + self.username.len() + self.password.len()
    }

    fn encode(&self, buf: &mut BytesMut) -> WireResult<()> {
        for (field, value) in [("username", &self.username), ("password", &self.password)] {
            if value.len() > MAX_CREDENTIAL_LEN {
                return Err(WireError::InvalidCredentials(format!(
                    "{field} is {} bytes (max {MAX_CREDENTIAL_LEN})",
                    value.len()
                )));
            }
            buf.put_u8(value.len() as u8);
            buf.put_slice(value.as_bytes());
        }
        Ok(())
    }

    fn decode(body: &mut Bytes) -> WireResult<Self> {
        let username = read_credential(body, "username")?;
        let password = read_credential(body, "password")?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn read_credential(body: &mut Bytes, field: &str) -> WireResult<String> {
    if !body.has_remaining() {
        return Err(WireError::InvalidCredentials(format!("missing {field} length")));
    }
    let len = body.get_u8() as usize;
    if body.remaining() < len {
        return Err(WireError::InvalidCredentials(format!(
            "{field} needs {len} bytes, have {}",
            body.remaining()
        )));
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| WireError::InvalidCredentials(format!("{field} is not valid UTF-8")))
}

// ============================================================================
// Frame
// ============================================================================

/// A complete decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: TcpCommand,
    pub flags: TcpFlags,
    pub correlation_id: Uuid,
    pub credentials: Option<Credentials>,
    /// Command-specific protobuf payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates an unauthenticated frame.
    pub fn new(command: TcpCommand, correlation_id: Uuid, payload: Bytes) -> Self {
        Self {
            command,
            flags: TcpFlags::NONE,
            correlation_id,
            credentials: None,
            payload,
        }
    }

    /// Creates a frame carrying a credentials block.
    pub fn authenticated(
        command: TcpCommand,
        correlation_id: Uuid,
        credentials: Credentials,
        payload: Bytes,
    ) -> Self {
        Self {
            command,
            flags: TcpFlags::AUTHENTICATED,
            correlation_id,
            credentials: Some(credentials),
            payload,
        }
    }

    /// Creates a frame whose payload is an encoded protobuf message.
    pub fn with_message<M: prost::Message>(
        command: TcpCommand,
        correlation_id: Uuid,
        credentials: Option<Credentials>,
        message: &M,
    ) -> Self {
        let payload = Bytes::from(message.encode_to_vec());
        match credentials {
            Some(credentials) => Self::authenticated(command, correlation_id, credentials, payload),
            None => Self::new(command, correlation_id, payload),
        }
    }

    /// Decodes the payload as a protobuf message.
    pub fn message<M: prost::Message + Default>(&self) -> WireResult<M> {
        Ok(M::decode(self.payload.clone())?)
    }

    /// Returns the body length (everything after the length prefix).
    pub fn body_len(&self) -> usize {
        HEADER_SIZE
            + self.credentials.as_ref().map_or(0, Credentials::encoded_len)
            + self.payload.len()
    }

    /// Encodes the frame, length prefix included.
    pub fn encode(&self, buf: &mut BytesMut) -> WireResult<()> {
        let body_len = self.body_len();
        buf.reserve(LENGTH_PREFIX_SIZE + body_len);
        buf.put_u32_le(body_len as u32);
        buf.put_u8(self.command.code());

        let flags = match self.credentials {
            Some(_) => self.flags.with(TcpFlags::AUTHENTICATED),
            None => self.flags,
        };
        buf.put_u8(flags.bits());
        buf.put_slice(&uuid_codec::uuid_to_bytes(self.correlation_id));

        if let Some(credentials) = &self.credentials {
            credentials.encode(buf)?;
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Encodes the frame to a new byte buffer.
    pub fn encode_to_bytes(&self) -> WireResult<Bytes> {
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + self.body_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Attempts to decode a frame from a streaming read buffer.
    ///
    /// Returns `Ok(None)` if more bytes are needed. Once the whole frame is
    /// buffered its bytes are consumed, even when decoding the body fails,
    /// so the stream stays aligned on the next frame.
    pub fn decode(buf: &mut BytesMut, max_size: u32) -> WireResult<Option<Self>> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let body_len = {
            let mut peek = &buf[..LENGTH_PREFIX_SIZE];
            peek.get_u32_le()
        };
        validate_length(body_len, max_size)?;

        let total = LENGTH_PREFIX_SIZE + body_len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(body_len as usize).freeze();
        Self::decode_body(body).map(Some)
    }

    /// Decodes exactly one frame from a complete buffer.
    ///
    /// Unlike [`Frame::decode`], a short buffer is an error.
    pub fn from_bytes(bytes: &[u8], max_size: u32) -> WireResult<Self> {
        if bytes.len() < LENGTH_PREFIX_SIZE {
            return Err(WireError::Truncated {
                needed: LENGTH_PREFIX_SIZE,
                available: bytes.len(),
            });
        }
        let mut prefix = &bytes[..LENGTH_PREFIX_SIZE];
        let body_len = prefix.get_u32_le();
        validate_length(body_len, max_size)?;

        let body = &bytes[LENGTH_PREFIX_SIZE..];
        if body.len() < body_len as usize {
            return Err(WireError::Truncated {
                needed: body_len as usize,
                available: body.len(),
            });
        }
        Self::decode_body(Bytes::copy_from_slice(&body[..body_len as usize]))
    }

    fn decode_body(mut body: Bytes) -> WireResult<Self> {
        debug_assert!(body.len() >= HEADER_SIZE, "length validated by caller");

        let code = body.get_u8();
        let flags = TcpFlags::from_bits(body.get_u8());
        let id_bytes = body.split_to(UUID_WIRE_LEN);
        let correlation_id = uuid_codec::uuid_from_bytes(&id_bytes)?;

        let command = TcpCommand::try_from(code)
            .map_err(|code| WireError::UnknownCommand { code, correlation_id })?;

        let credentials = if flags.contains(TcpFlags::AUTHENTICATED) {
            let credentials =
                Credentials::decode(&mut body).map_err(|e| WireError::MalformedBody {
                    correlation_id,
                    reason: e.to_string(),
                })?;
            Some(credentials)
        } else {
            None
        };

        Ok(Self {
            command,
            flags,
            correlation_id,
            credentials,
            payload: body,
        })
    }
}

fn validate_length(body_len: u32, max_size: u32) -> WireResult<()> {
    if (body_len as usize) < HEADER_SIZE {
        return Err(WireError::Truncated {
            needed: HEADER_SIZE,
            available: body_len as usize,
        });
    }
    if body_len > max_size {
        return Err(WireError::FrameTooLarge {
            size: body_len,
            max: max_size,
        });
    }
    Ok(())
}
