//! Nallely telemetry - real-time telemetry and control channels.
//!
//! This library connects UI widgets to the telemetry endpoints of a
//! Nallely session: one WebSocket per widget instance, a registration
//! handshake declaring its parameters, binary/JSON value frames in both
//! directions, and automatic reconnection.
//!
//! # Architecture
//!
//! ```text
//! Service (widget handle)
//!    ├── direct ──► RegistrationBus ──► Connection ──► ws://host:6789/<id>/autoconfig
//!    └── scope ───► Multiplexer ─────► Connection ──► ws://host:6789/<id>/autoconfig
//!                   (batched, 16 ms)
//! ```
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns one transport and one event loop task
//! - At most one live connection per registration key or scope
//! - Sends are best effort; nothing is queued while disconnected
//! - Once `dispose()` returns, no callback fires
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nallely_telemetry::{ParameterDescriptor, RegistrationBus, Result, Service};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = RegistrationBus::with_defaults();
//!
//!     let service = Service::builder("controls", "pad-1")
//!         .parameter(ParameterDescriptor::new("x").with_range(0.0, 127.0))
//!         .register(&bus)
//!         .await?;
//!
//!     service.send("x", 64.0);
//!     println!("last x: {:?}", service.value("x"));
//!
//!     service.dispose();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Endpoint and timing configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Registration keys and scope ids |
//! | [`multiplexer`] | Batching multiplexer for telemetry scopes |
//! | [`protocol`] | Wire codec and message types |
//! | [`service`] | Per-widget service facade |
//! | [`transport`] | Connections, connectors and the registration bus |

// ============================================================================
// Modules
// ============================================================================

/// Endpoint and timing configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Registration keys, scope ids and connection ids.
pub mod identifiers;

/// Batching multiplexer.
///
/// Runs many scope connections under one actor and delivers their samples
/// in fixed-period batches.
pub mod multiplexer;

/// Wire codec and message types.
pub mod protocol;

/// Per-widget service facade.
pub mod service;

/// WebSocket transport layer.
///
/// Connection lifecycle, transport construction and the registration bus.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{ControlEncoding, TelemetryConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, RegistrationKey, ScopeId};

// Multiplexer types
pub use multiplexer::{Multiplexer, ScopeObserver, ScopeSubscription};

// Protocol types
pub use protocol::{Frame, Handshake, ParameterDescriptor, ValueUpdate, WorkerCommand, WorkerEvent};

// Service types
pub use service::{Service, ServiceBuilder, ServiceObserver, SharedValues};

// Transport types
pub use transport::{
    Connection, ConnectionObserver, ConnectionOptions, ConnectionState, Connector, Registration,
    RegistrationBus, WsConnector,
};
