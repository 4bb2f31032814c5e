//! Error types for Nallely telemetry channels.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use nallely_telemetry::{Result, protocol::codec};
//!
//! fn example(frame: &[u8]) -> Result<()> {
//!     let update = codec::decode_binary(frame)?;
//!     println!("{} = {}", update.on, update.value);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Decoding | [`Error::FrameTooShort`], [`Error::NameTooLong`], [`Error::InvalidUtf8`], [`Error::Json`] |
//! | Addressing | [`Error::AddressNotFound`], [`Error::Disposed`] |
//! | External | [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::str::Utf8Error;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RegistrationKey;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when [`TelemetryConfig`](crate::config::TelemetryConfig)
    /// validation fails or an endpoint URL cannot be derived.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport did not finish connecting in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transport closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Decoding Errors
    // ========================================================================
    /// Binary frame shorter than its own length byte implies.
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes the frame must hold.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    /// Channel name does not fit the one-byte length prefix.
    #[error("Channel name too long: {len} bytes (max 255)")]
    NameTooLong {
        /// UTF-8 length of the rejected name.
        len: usize,
    },

    /// Channel name bytes are not valid UTF-8.
    #[error("Invalid UTF-8 in channel name: {0}")]
    InvalidUtf8(#[from] Utf8Error),

    // ========================================================================
    // Addressing Errors
    // ========================================================================
    /// No registration exists under the given key.
    #[error("No registration for {key}")]
    AddressNotFound {
        /// The key that was looked up.
        key: RegistrationKey,
    },

    /// Operation on a disposed service or a stopped multiplexer.
    #[error("Already disposed")]
    Disposed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a frame-too-short error.
    #[inline]
    pub fn frame_too_short(expected: usize, actual: usize) -> Self {
        Self::FrameTooShort { expected, actual }
    }

    /// Creates an address-not-found error.
    #[inline]
    pub fn address_not_found(key: RegistrationKey) -> Self {
        Self::AddressNotFound { key }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from decoding an inbound frame.
    ///
    /// Decode errors drop the frame; the connection stays open.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::NameTooLong { .. }
                | Self::InvalidUtf8(_)
                | Self::Json(_)
        )
    }

    /// Returns `true` if this error came from the transport.
    ///
    /// The reconnect policy recovers from these.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
