//! Telemetry protocol message types and wire codec.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Encoding |
//! |---------|-----------|----------|
//! | [`Handshake`] | Local → Remote | JSON text, first frame after open |
//! | [`ValueUpdate`] | Remote → Local | JSON text or binary |
//! | control value | Local → Remote | binary (default) or JSON text |
//! | [`WorkerCommand`] / [`WorkerEvent`] | in-process | structured values |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Binary/JSON encode and decode |
//! | `message` | Descriptors, updates, handshake, raw frames |
//! | `worker` | Multiplexer command and event messages |

// ============================================================================
// Submodules
// ============================================================================

/// Binary and JSON frame codec.
pub mod codec;

/// Logical message types.
pub mod message;

/// Multiplexer actor messages.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{Frame, Handshake, ParameterDescriptor, ValueUpdate};
pub use worker::{WorkerCommand, WorkerEvent};
