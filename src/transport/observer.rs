//! Observer interfaces and the slot that guards them.
//!
//! Callbacks are delivered through an [`ObserverSlot`]. Clearing the slot
//! blocks until any callback running on another thread returns, so once
//! `clear()` returns no further callback can fire. A callback may clear its
//! own slot (the lock is reentrant).

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::error::Error;
use crate::protocol::{Handshake, ValueUpdate};

// ============================================================================
// ConnectionObserver
// ============================================================================

/// Receives events from one [`Connection`](super::Connection).
///
/// All methods default to no-ops. Calls for one connection are sequential
/// and in receipt order.
pub trait ConnectionObserver: Send + Sync {
    /// Handshake was sent; the connection is open.
    fn on_open(&self, _handshake: &Handshake) {}

    /// A frame decoded to a value update.
    fn on_message(&self, _update: ValueUpdate) {}

    /// Transport error or dropped malformed frame.
    ///
    /// Use [`Error::is_decode_error`] to tell them apart.
    fn on_error(&self, _error: &Error) {}

    /// Transport closed (a reconnect may follow).
    fn on_close(&self) {}
}

/// Observer that ignores every event.
impl ConnectionObserver for () {}

// ============================================================================
// ObserverSlot
// ============================================================================

/// Holds an observer until cleared.
pub struct ObserverSlot<T: ?Sized> {
    inner: ReentrantMutex<RefCell<Option<Arc<T>>>>,
}

impl<T: ?Sized> ObserverSlot<T> {
    /// Creates a slot holding `observer`.
    #[must_use]
    pub fn new(observer: Arc<T>) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Some(observer))),
        }
    }

    /// Invokes `f` with the observer, if still set.
    ///
    /// Returns `false` if the slot was already cleared.
    pub fn with(&self, f: impl FnOnce(&T)) -> bool {
        let guard = self.inner.lock();
        let observer = guard.borrow().clone();
        match observer {
            Some(observer) => {
                f(&observer);
                true
            }
            None => false,
        }
    }

    /// Removes the observer. Returns `true` if one was set.
    pub fn clear(&self) -> bool {
        let guard = self.inner.lock();
        let previous = guard.borrow_mut().take();
        previous.is_some()
    }

    /// Returns `true` while an observer is set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.lock().borrow().is_some()
    }
}

impl<T: ?Sized> fmt::Debug for ObserverSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl ConnectionObserver for Counter {
        fn on_message(&self, _update: ValueUpdate) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_with_and_clear() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let slot: ObserverSlot<dyn ConnectionObserver> = ObserverSlot::new(counter.clone());

        assert!(slot.with(|o| o.on_message(ValueUpdate::new("x", 1.0))));
        assert!(slot.clear());
        assert!(!slot.with(|o| o.on_message(ValueUpdate::new("x", 2.0))));
        assert!(!slot.clear());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_from_inside_callback() {
        let slot: Arc<ObserverSlot<dyn ConnectionObserver>> = Arc::new(ObserverSlot::new(Arc::new(())));
        let inner = Arc::clone(&slot);

        slot.with(|_| {
            assert!(inner.clear());
        });

        assert!(!slot.is_set());
    }
}
