//! Last-known-value cache mirrored by a [`Service`](super::Service).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

// ============================================================================
// SharedValues
// ============================================================================

/// Shared map from parameter name to its last received value.
///
/// Clones share the same storage. A service writes every inbound update
/// here before notifying its observer, so a reader always sees a value at
/// least as new as the last notification.
#[derive(Clone, Default)]
pub struct SharedValues {
    inner: Arc<RwLock<FxHashMap<String, f64>>>,
}

impl SharedValues {
    /// Creates an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.inner.read().get(name).copied()
    }

    /// Stores `value` under `name`.
    pub fn set(&self, name: &str, value: f64) {
        let mut values = self.inner.write();
        match values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                values.insert(name.to_string(), value);
            }
        }
    }

    /// Returns a copy of every stored value.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, f64> {
        self.inner.read().clone()
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl fmt::Debug for SharedValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.read().iter()).finish()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for SharedValues {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let map = iter.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_storage() {
        let values = SharedValues::new();
        let view = values.clone();

        values.set("x", 1.0);
        values.set("x", 2.0);
        assert_eq!(view.get("x"), Some(2.0));
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("y"), None);
    }

    #[test]
    fn test_from_iter() {
        let values: SharedValues = [("x", 0.5), ("y", 64.0)].into_iter().collect();
        let snapshot = values.snapshot();
        assert_eq!(snapshot.get("y"), Some(&64.0));
        assert!(!values.is_empty());
    }
}
