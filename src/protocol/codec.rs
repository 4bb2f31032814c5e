//! Wire codec for telemetry and control frames.
//!
//! Pure functions, no I/O and no state. Shared by connections, the
//! multiplexer and the service facade.
//!
//! # Binary Layout
//!
//! ```text
//! ┌──────────┬─────────────────────┬──────────────────────┐
//! │ nameLen  │ name (UTF-8)        │ value (f64, BE)      │
//! │ 1 byte   │ nameLen bytes       │ 8 bytes              │
//! └──────────┴─────────────────────┴──────────────────────┘
//! ```
//!
//! The value is always a big-endian IEEE-754 float64. Bytes past
//! `1 + nameLen + 8` are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::str;

use serde_json::{from_str, to_string};

use crate::error::{Error, Result};

use super::message::{Handshake, ValueUpdate};

// ============================================================================
// Constants
// ============================================================================

/// Width of the trailing float in bytes.
pub const FLOAT_SIZE: usize = 8;

/// Longest channel name the length prefix can describe.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

// ============================================================================
// Binary
// ============================================================================

/// Returns the encoded size of a binary frame for `name`.
#[inline]
#[must_use]
pub fn binary_len(name: &str) -> usize {
    1 + name.len() + FLOAT_SIZE
}

/// Encodes `(name, value)` as a binary control frame.
///
/// # Errors
///
/// Returns [`Error::NameTooLong`] if `name` exceeds 255 UTF-8 bytes.
pub fn encode_binary(name: &str, value: f64) -> Result<Vec<u8>> {
    let name_len = u8::try_from(name.len()).map_err(|_| Error::NameTooLong { len: name.len() })?;

    let mut buf = Vec::with_capacity(binary_len(name));
    buf.push(name_len);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
    Ok(buf)
}

/// Decodes a binary telemetry frame.
///
/// # Errors
///
/// - [`Error::FrameTooShort`] if the buffer cannot hold the length byte,
///   the name, and the float
/// - [`Error::InvalidUtf8`] if the name is not valid UTF-8
pub fn decode_binary(buf: &[u8]) -> Result<ValueUpdate> {
    let Some((&name_len, rest)) = buf.split_first() else {
        return Err(Error::frame_too_short(1, 0));
    };

    let name_len = usize::from(name_len);
    let expected = 1 + name_len + FLOAT_SIZE;
    if buf.len() < expected {
        return Err(Error::frame_too_short(expected, buf.len()));
    }

    let (name_bytes, rest) = rest.split_at(name_len);
    let name = str::from_utf8(name_bytes)?;

    let mut raw = [0u8; FLOAT_SIZE];
    raw.copy_from_slice(&rest[..FLOAT_SIZE]);

    Ok(ValueUpdate::new(name, f64::from_be_bytes(raw)))
}

// ============================================================================
// Text
// ============================================================================

/// Encodes a value update as a JSON text frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_text(name: &str, value: f64) -> Result<String> {
    Ok(to_string(&ValueUpdate::new(name, value))?)
}

/// Decodes a JSON text telemetry frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if the text is not `{"on": string, "value": number}`.
pub fn decode_text(text: &str) -> Result<ValueUpdate> {
    Ok(from_str(text)?)
}

/// Serializes the registration handshake.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_handshake(handshake: &Handshake) -> Result<String> {
    Ok(to_string(handshake)?)
}

// ============================================================================
// Tests
// ============================================================================
