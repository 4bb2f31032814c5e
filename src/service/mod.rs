//! Per-widget service facade.
//!
//! A [`Service`] is what a widget holds. It hides whether values arrive
//! over a direct control connection registered on the [`RegistrationBus`]
//! (interactive widgets: low rate, bidirectional) or over a
//! [`Multiplexer`](crate::multiplexer::Multiplexer) scope (high-rate,
//! batched, receive only).
//!
//! Every inbound value is first mirrored into the service's
//! [`SharedValues`], then passed to its [`ServiceObserver`].
//!
//! Expected failures (disconnects, malformed frames, stale handles) never
//! surface as errors from `send` or `dispose`; they are logged and the
//! service keeps reconnecting in the background.
//!
//! # Example
//!
//! ```ignore
//! let service = Service::builder("controls", "pad-1")
//!     .parameter(ParameterDescriptor::new("x").with_range(0.0, 1.0))
//!     .initial_value("x", 0.5)
//!     .observer(Arc::new(MyWidget))
//!     .register(&bus)
//!     .await?;
//!
//! service.send("x", 0.75);
//! let last = service.value("x");
//! service.dispose();
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod builder;
mod values;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::Error;
use crate::identifiers::RegistrationKey;
use crate::multiplexer::{ScopeObserver, ScopeSubscription};
use crate::protocol::{Handshake, ValueUpdate};
use crate::transport::{ConnectionObserver, Registration, RegistrationBus};

pub use builder::ServiceBuilder;
pub use values::SharedValues;

// ============================================================================
// ServiceObserver
// ============================================================================

/// Receives the events of one [`Service`].
///
/// All methods default to no-ops. No method is called after
/// [`Service::dispose`] returns.
pub trait ServiceObserver: Send + Sync {
    /// One value arrived. The value cache is already updated.
    fn on_message(&self, _update: &ValueUpdate) {}

    /// A batch arrived from a multiplexed scope.
    ///
    /// Defaults to one [`Self::on_message`] call per sample.
    fn on_batch(&self, messages: &[ValueUpdate]) {
        for update in messages {
            self.on_message(update);
        }
    }

    /// The connection is open.
    fn on_open(&self) {}

    /// A transport error or a dropped malformed frame.
    fn on_error(&self, _error: &Error) {}

    /// The transport closed; a reconnect will follow.
    fn on_close(&self) {}
}

/// Observer that ignores every event.
impl ServiceObserver for () {}

// ============================================================================
// Adapters
// ============================================================================

/// Bridges a direct connection to a service observer.
struct DirectAdapter {
    values: SharedValues,
    observer: Arc<dyn ServiceObserver>,
}

impl ConnectionObserver for DirectAdapter {
    fn on_open(&self, _handshake: &Handshake) {
        self.observer.on_open();
    }

    fn on_message(&self, update: ValueUpdate) {
        self.values.set(&update.on, update.value);
        self.observer.on_message(&update);
    }

    fn on_error(&self, error: &Error) {
        self.observer.on_error(error);
    }

    fn on_close(&self) {
        self.observer.on_close();
    }
}

/// Bridges a multiplexed scope to a service observer.
struct ScopeAdapter {
    values: SharedValues,
    observer: Arc<dyn ServiceObserver>,
}

impl ScopeObserver for ScopeAdapter {
    fn on_batch(&self, messages: &[ValueUpdate]) {
        for update in messages {
            self.values.set(&update.on, update.value);
        }
        self.observer.on_batch(messages);
    }

    fn on_open(&self) {
        self.observer.on_open();
    }

    fn on_error(&self) {
        self.observer
            .on_error(&Error::connection("Scope transport reported an error"));
    }
}

// ============================================================================
// Service
// ============================================================================

enum Backend {
    Direct {
        bus: Arc<RegistrationBus>,
        registration: Registration,
    },
    Scope {
        subscription: ScopeSubscription,
    },
}

/// Handle a widget holds for its telemetry/control channel.
///
/// Dropping the service disposes it.
pub struct Service {
    key: RegistrationKey,
    values: SharedValues,
    backend: Backend,
    disposed: AtomicBool,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self.backend {
            Backend::Direct { .. } => "direct",
            Backend::Scope { .. } => "scope",
        };

        f.debug_struct("Service")
            .field("key", &self.key)
            .field("backend", &backend)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Starts building a service for `category::identifier`.
    #[inline]
    #[must_use]
    pub fn builder(category: impl Into<String>, identifier: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder::new(category, identifier)
    }

    /// Returns the registration key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    /// Returns the last-known-value cache.
    #[inline]
    #[must_use]
    pub fn values(&self) -> &SharedValues {
        &self.values
    }

    /// Returns the last value received (or seeded) for `name`.
    #[inline]
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name)
    }

    /// Returns `true` once disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Sends a control value, best effort.
    ///
    /// Returns `true` if the value was handed to an open connection. A
    /// disposed, superseded or receive-only service drops the value.
    pub fn send(&self, name: &str, value: f64) -> bool {
        if self.is_disposed() {
            debug!(key = %self.key, name, "Send on disposed service ignored");
            return false;
        }

        match &self.backend {
            Backend::Direct { bus, registration } => bus.send_as(registration, name, value),
            Backend::Scope { .. } => {
                warn!(key = %self.key, name, "Scope services are receive only");
                false
            }
        }
    }

    /// Tears the registration down. Idempotent.
    ///
    /// No observer method runs after this returns.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        match &self.backend {
            Backend::Direct { bus, registration } => {
                bus.unregister(registration);
            }
            Backend::Scope { subscription } => subscription.dispose(),
        }

        debug!(key = %self.key, "Service disposed");
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::sleep;

    use crate::config::TelemetryConfig;
    use crate::multiplexer::Multiplexer;
    use crate::protocol::{Frame, ParameterDescriptor, codec};
    use crate::transport::{MemoryConnector, MemoryListener};

    #[derive(Default)]
    struct Widget {
        seen: Mutex<Vec<(ValueUpdate, Option<f64>)>>,
        values: Mutex<Option<SharedValues>>,
        opened: Mutex<usize>,
        errors: Mutex<usize>,
    }

    impl ServiceObserver for Widget {
        fn on_message(&self, update: &ValueUpdate) {
            let cached = self.values.lock().as_ref().and_then(|v| v.get(&update.on));
            self.seen.lock().push((update.clone(), cached));
        }

        fn on_open(&self) {
            *self.opened.lock() += 1;
        }

        fn on_error(&self, _error: &Error) {
            *self.errors.lock() += 1;
        }
    }

    fn bus() -> (Arc<RegistrationBus>, MemoryConnector, MemoryListener) {
        let (connector, listener) = MemoryConnector::new();
        let bus = RegistrationBus::new(TelemetryConfig::new(), Arc::new(connector.clone()))
            .expect("bus");
        (bus, connector, listener)
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_service_round_trip() {
        let (bus, _connector, mut listener) = bus();
        let widget = Arc::new(Widget::default());
        let values = SharedValues::new();
        *widget.values.lock() = Some(values.clone());

        let service = Service::builder("controls", "pad-1")
            .parameter(ParameterDescriptor::new("x").with_range(0.0, 1.0))
            .values(values.clone())
            .initial_value("x", 0.5)
            .observer(widget.clone())
            .register(&bus)
            .await
            .expect("register");

        assert_eq!(service.value("x"), Some(0.5));

        let mut peer = listener.accept().await.expect("peer");
        peer.handshake().await.expect("handshake");
        settle().await;
        assert_eq!(*widget.opened.lock(), 1);

        peer.send_update("x", 0.9);
        settle().await;
        assert_eq!(service.value("x"), Some(0.9));
        // Cache was updated before the observer ran
        assert_eq!(*widget.seen.lock(), vec![(ValueUpdate::new("x", 0.9), Some(0.9))]);

        assert!(service.send("x", 0.25));
        assert_eq!(
            peer.recv().await,
            Some(Frame::Binary(codec::encode_binary("x", 0.25).expect("encode")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_idempotent_and_silences() {
        let (bus, connector, mut listener) = bus();
        let widget = Arc::new(Widget::default());

        let service = Service::builder("controls", "pad-1")
            .parameter(ParameterDescriptor::new("x"))
            .observer(widget.clone())
            .register(&bus)
            .await
            .expect("register");
        let peer = listener.accept().await.expect("peer");
        settle().await;

        service.dispose();
        service.dispose();
        assert!(!service.send("x", 1.0));

        peer.send_update("x", 1.0);
        settle().await;
        assert!(widget.seen.lock().is_empty());
        assert!(bus.is_empty());
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_service_leaves_replacement() {
        let (bus, _connector, _listener) = bus();

        let old = Service::builder("controls", "pad-1")
            .register(&bus)
            .await
            .expect("old");
        let new = Service::builder("controls", "pad-1")
            .register(&bus)
            .await
            .expect("new");

        assert!(!old.send("x", 1.0));
        drop(old);

        assert!(bus.contains(new.key()));
        assert!(!new.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unregisters() {
        let (bus, _connector, _listener) = bus();

        let service = Service::builder("buttons", "go")
            .register(&bus)
            .await
            .expect("register");
        assert_eq!(bus.len(), 1);

        drop(service);
        assert!(bus.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_service_batches() {
        let (connector, mut listener) = MemoryConnector::new();
        let multiplexer = Multiplexer::spawn(TelemetryConfig::new(), Arc::new(connector))
            .expect("multiplexer");
        let widget = Arc::new(Widget::default());

        let service = Service::builder("oscilloscope", "1")
            .parameter(ParameterDescriptor::new("data").streaming())
            .observer(widget.clone())
            .subscribe(&multiplexer)
            .expect("subscribe");

        let peer = listener.accept().await.expect("peer");
        assert_eq!(peer.url().as_str(), "ws://localhost:6789/1/autoconfig");
        settle().await;

        peer.send_update("data", 1.0);
        peer.send_update("data", 2.0);
        sleep(Duration::from_millis(20)).await;

        let seen: Vec<_> = widget.seen.lock().iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(seen, vec![ValueUpdate::new("data", 1.0), ValueUpdate::new("data", 2.0)]);
        assert_eq!(service.value("data"), Some(2.0));
        assert_eq!(*widget.opened.lock(), 1);
        assert!(!service.send("data", 0.0));
    }
}
