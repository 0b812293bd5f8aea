//! Conversion between canonical UUID text and the server's 16-byte wire form.
//!
//! The server stores identifiers in mixed-endian GUID order:
//!
//! ```text
//! text:  aabbccdd-eeff-gghh-iijj-kkllmmnnoopp
//! wire:  dd cc bb aa | ff ee | hh gg | ii jj | kk ll mm nn oo pp
//! ```
//!
//! The first three groups (4, 2 and 2 bytes) are each reversed; the last two
//! groups are copied verbatim.

use uuid::Uuid;

use crate::error::{EventError, EventResult};

/// Length of an identifier on the wire.
pub const UUID_WIRE_LEN: usize = 16;

/// Encodes UUID text into wire bytes.
pub fn to_bytes(text: &str) -> EventResult<[u8; UUID_WIRE_LEN]> {
    let uuid = Uuid::parse_str(text)
        .map_err(|e| EventError::protocol(format!("invalid uuid {text:?}: {e}")))?;
    Ok(uuid_to_bytes(uuid))
}

/// Decodes wire bytes into canonical (lowercase, hyphenated) UUID text.
pub fn to_text(bytes: &[u8]) -> EventResult<String> {
    Ok(uuid_from_bytes(bytes)?.hyphenated().to_string())
}

/// Encodes a [`Uuid`] into wire bytes.
pub fn uuid_to_bytes(uuid: Uuid) -> [u8; UUID_WIRE_LEN] {
    let canonical = uuid.as_bytes();
    let mut wire = *canonical;
    swap_groups(&mut wire);
    debug_assert_eq!(&wire[8..], &canonical[8..]);
    wire
}

/// Decodes wire bytes into a [`Uuid`].
///
/// Fails if the slice is not exactly 16 bytes long.
pub fn uuid_from_bytes(bytes: &[u8]) -> EventResult<Uuid> {
    let mut canonical: [u8; UUID_WIRE_LEN] = bytes.try_into().map_err(|_| {
        EventError::protocol(format!(
            "identifier must be {UUID_WIRE_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    swap_groups(&mut canonical);
    Ok(Uuid::from_bytes(canonical))
}

// The transform is its own inverse.
fn swap_groups(bytes: &mut [u8; UUID_WIRE_LEN]) {
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();
}
