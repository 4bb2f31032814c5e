//! Logical message types carried over telemetry channels.
//!
//! # Format
//!
//! | Type | Direction | JSON shape |
//! |------|-----------|------------|
//! | [`Handshake`] | Local → Remote | `{"kind": "...", "parameters": [...]}` |
//! | [`ValueUpdate`] | both | `{"on": "...", "value": 0.5}` |
//!
//! [`Frame`] is the raw transport unit (text or binary) before decoding.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::codec;

// ============================================================================
// ParameterDescriptor
// ============================================================================

/// One controllable or observable channel a widget exposes.
///
/// # Format
///
/// ```json
/// { "name": "cutoff", "range": [0, 127], "stream": true }
/// ```
///
/// `stream` is omitted from the wire when `false`. `null` range bounds mean
/// unbounded; bounds are advisory for the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Channel name, matched against [`ValueUpdate::on`].
    pub name: String,

    /// Advisory `(min, max)` bounds.
    pub range: (Option<f64>, Option<f64>),

    /// Channel emits a continuous sample stream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl ParameterDescriptor {
    /// Creates an unbounded, non-streaming descriptor.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: (None, None),
            stream: false,
        }
    }

    /// Sets both range bounds.
    #[inline]
    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = (Some(min), Some(max));
        self
    }

    /// Sets the lower bound only.
    #[inline]
    #[must_use]
    pub fn with_min(mut self, min: f64) -> Self {
        self.range.0 = Some(min);
        self
    }

    /// Sets the upper bound only.
    #[inline]
    #[must_use]
    pub fn with_max(mut self, max: f64) -> Self {
        self.range.1 = Some(max);
        self
    }

    /// Marks the channel as a continuous stream.
    #[inline]
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

// ============================================================================
// ValueUpdate
// ============================================================================

/// The latest numeric sample on one named channel.
///
/// Atomic unit of both the decoded wire protocol and flushed batches.
/// Extra JSON fields sent by the backend (`device`, `sender`) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueUpdate {
    /// Channel name.
    pub on: String,

    /// Sample value.
    pub value: f64,
}

impl ValueUpdate {
    /// Creates a value update.
    #[inline]
    #[must_use]
    pub fn new(on: impl Into<String>, value: f64) -> Self {
        Self {
            on: on.into(),
            value,
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

/// Registration handshake sent as the first text frame on every open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// Widget category (e.g. `oscilloscope`, `controls`).
    pub kind: String,

    /// Declared channels.
    pub parameters: Vec<ParameterDescriptor>,
}

impl Handshake {
    /// Creates a handshake for a widget category.
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, parameters: Vec<ParameterDescriptor>) -> Self {
        Self {
            kind: kind.into(),
            parameters,
        }
    }

    /// Returns `true` if any declared channel is a stream.
    #[inline]
    #[must_use]
    pub fn has_streams(&self) -> bool {
        self.parameters.iter().any(|p| p.stream)
    }

    /// Serializes to the JSON text sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        codec::encode_handshake(self)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A raw transport frame, independent of the WebSocket implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame carrying JSON.
    Text(String),
    /// Binary frame carrying `[len][name][f64 BE]`.
    Binary(Vec<u8>),
}

impl Frame {
    /// Decodes the frame into a value update.
    ///
    /// # Errors
    ///
    /// Returns a decode error (see [`Error::is_decode_error`](crate::Error::is_decode_error))
    /// if the frame is malformed.
    pub fn decode(&self) -> Result<ValueUpdate> {
        match self {
            Self::Text(text) => codec::decode_text(text),
            Self::Binary(bytes) => codec::decode_binary(bytes),
        }
    }

    /// Returns the frame length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the frame carries no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
