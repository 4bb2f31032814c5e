//! Type-safe identifiers for telemetry endpoints.
//!
//! Newtype wrappers keep registration keys, scope ids and connection ids
//! from being mixed up at compile time.
//!
//! | Type | Format | Used by |
//! |------|--------|---------|
//! | [`RegistrationKey`] | `category::identifier` | registration bus |
//! | [`ScopeId`] | `kind::identifier` | multiplexer |
//! | [`ConnectionId`] | UUID v4 | connection logs |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Separator between category and identifier.
pub const KEY_SEPARATOR: &str = "::";

// ============================================================================
// RegistrationKey
// ============================================================================

/// Composite key addressing one logical endpoint in the bus.
///
/// Formatted as `"<category>::<identifier>"`, e.g. `controls::widget-7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationKey {
    category: String,
    identifier: String,
}

impl RegistrationKey {
    /// Creates a key from a widget category and instance identifier.
    #[inline]
    #[must_use]
    pub fn new(category: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            identifier: identifier.into(),
        }
    }

    /// Returns the widget category (e.g. `oscilloscope`).
    #[inline]
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Returns the widget instance identifier.
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns the scope id addressing the same endpoint in the multiplexer.
    #[inline]
    #[must_use]
    pub fn scope_id(&self) -> ScopeId {
        ScopeId::new(self.to_string())
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.category, self.identifier)
    }
}

// ============================================================================
// ScopeId
// ============================================================================

/// Identifier of one multiplexed telemetry scope.
///
/// Serialized as a plain string in worker messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    /// Creates a scope id from any string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<&RegistrationKey> for ScopeId {
    fn from(key: &RegistrationKey) -> Self {
        key.scope_id()
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Unique id of one [`Connection`](crate::transport::Connection) instance.
///
/// Only used to correlate log lines across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
