//! WebSocket transport layer.
//!
//! This module owns every connection to a telemetry endpoint: how it is
//! opened, how it survives drops, and how callers address it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌──────────────────┐
//! │  Widget (Rust)   │                              │  Telemetry       │
//! │                  │         WebSocket            │  endpoint        │
//! │  Connection      │◄────────────────────────────►│                  │
//! │  (event loop)    │  host:6789/<id>/autoconfig   │                  │
//! └──────────────────┘                              └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::open` - Spawn the event loop, connect through a `Connector`
//! 2. Send the registration handshake, deliver inbound values to the observer
//! 3. On transport loss, reconnect once after the fixed delay
//! 4. `Connection::dispose` - Stop callbacks, cancel timers, close transport
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bus` | Keyed directory of control connections |
//! | `connection` | Connection lifecycle and event loop |
//! | `connector` | Transport construction (tokio-tungstenite) |
//! | `memory` | In-process transport for tests and embedding |
//! | `observer` | Callback interface and disposal guard |

// ============================================================================
// Submodules
// ============================================================================

/// Registration bus.
pub mod bus;

/// Connection lifecycle and event loop.
pub mod connection;

/// Transport construction.
pub mod connector;

/// In-process transport.
pub mod memory;

/// Observer interface.
pub mod observer;

// ============================================================================
// Re-exports
// ============================================================================

pub use bus::{Registration, RegistrationBus};
pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use connector::{Connector, FrameSink, FrameStream, Transport, WsConnector};
pub use memory::{MemoryConnector, MemoryEvent, MemoryListener, MemoryPeer};
pub use observer::{ConnectionObserver, ObserverSlot};
