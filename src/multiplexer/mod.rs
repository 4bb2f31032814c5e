//! Batching multiplexer for high-frequency telemetry scopes.
//!
//! Many scope connections run under one actor task. Inbound samples are
//! buffered per scope and flushed as one batch per scope every flush
//! interval (16 ms by default), so consumers see at most ~60 deliveries per
//! second regardless of the sample rate.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  WorkerCommand   ┌───────────────────┐
//! │ Multiplexer  │─────────────────►│  Actor task       │◄── scope connections
//! │ (handle)     │                  │  ScopeId → buffer │
//! └──────────────┘                  └─────────┬─────────┘
//!        ▲                                    │ WorkerEvent (data/open/error)
//!        │          ┌──────────────┐          │
//!        └──────────│  Dispatcher  │◄─────────┘
//!     ScopeObserver └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `actor` | Scope map, buffering and flush loop |
//! | `handle` | [`Multiplexer`] handle, [`ScopeSubscription`], [`ScopeObserver`] |

// ============================================================================
// Submodules
// ============================================================================

mod actor;
mod handle;

// ============================================================================
// Re-exports
// ============================================================================

pub use handle::{Multiplexer, ScopeObserver, ScopeSubscription};
