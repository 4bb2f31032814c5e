//! Builder pattern for service registration.
//!
//! Provides a fluent API for declaring a widget's parameters and creating
//! its [`Service`].
//!
//! # Example
//!
//! ```ignore
//! let service = Service::builder("oscilloscope", "1")
//!     .parameter(ParameterDescriptor::new("data").with_range(-1.0, 1.0).streaming())
//!     .observer(Arc::new(Scope))
//!     .subscribe(&multiplexer)?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::debug;

use crate::config::autoconfig_url;
use crate::error::Result;
use crate::identifiers::RegistrationKey;
use crate::multiplexer::Multiplexer;
use crate::protocol::ParameterDescriptor;
use crate::transport::RegistrationBus;

use super::values::SharedValues;
use super::{Backend, DirectAdapter, ScopeAdapter, Service, ServiceObserver};

// ============================================================================
// ServiceBuilder
// ============================================================================

/// Builder for a [`Service`].
///
/// Use [`Service::builder()`] to create one.
pub struct ServiceBuilder {
    /// Registration key.
    key: RegistrationKey,
    /// Declared parameters, sent in the handshake.
    parameters: Vec<ParameterDescriptor>,
    /// Value cache; a fresh one unless supplied.
    values: SharedValues,
    /// Values seeded into the cache before registration.
    initial_values: Vec<(String, f64)>,
    /// Endpoint base overriding the configured telemetry address.
    base_address: Option<String>,
    /// Event receiver.
    observer: Arc<dyn ServiceObserver>,
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("key", &self.key)
            .field("parameters", &self.parameters)
            .field("base_address", &self.base_address)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ServiceBuilder Implementation
// ============================================================================

impl ServiceBuilder {
    /// Creates a builder for `category::identifier` with no parameters.
    #[must_use]
    pub fn new(category: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            key: RegistrationKey::new(category, identifier),
            parameters: Vec::new(),
            values: SharedValues::new(),
            initial_values: Vec::new(),
            base_address: None,
            observer: Arc::new(()),
        }
    }

    /// Declares one parameter.
    #[inline]
    #[must_use]
    pub fn parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Declares several parameters.
    #[inline]
    #[must_use]
    pub fn parameters(mut self, parameters: impl IntoIterator<Item = ParameterDescriptor>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Mirrors inbound values into an existing cache.
    #[inline]
    #[must_use]
    pub fn values(mut self, values: SharedValues) -> Self {
        self.values = values;
        self
    }

    /// Seeds the cache with a value before registering.
    #[inline]
    #[must_use]
    pub fn initial_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.initial_values.push((name.into(), value));
        self
    }

    /// Connects to `<base>/<identifier>/autoconfig` instead of the
    /// configured telemetry address.
    #[inline]
    #[must_use]
    pub fn base_address(mut self, base: impl Into<String>) -> Self {
        self.base_address = Some(base.into());
        self
    }

    /// Sets the event receiver.
    #[inline]
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ServiceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Registers a direct control connection on `bus`.
    ///
    /// Replaces any earlier registration for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`](crate::Error::Url) or
    /// [`Error::Config`](crate::Error::Config) if no endpoint URL can be
    /// built.
    pub async fn register(self, bus: &Arc<RegistrationBus>) -> Result<Service> {
        self.seed();

        let adapter = Arc::new(DirectAdapter {
            values: self.values.clone(),
            observer: self.observer,
        });

        let registration = bus
            .register(
                self.key.clone(),
                self.parameters,
                self.base_address.as_deref(),
                adapter,
            )
            .await?;

        debug!(key = %self.key, generation = registration.generation(), "Direct service registered");

        Ok(Service {
            key: self.key,
            values: self.values,
            backend: Backend::Direct {
                bus: Arc::clone(bus),
                registration,
            },
            disposed: AtomicBool::new(false),
        })
    }

    /// Subscribes a batched scope on `multiplexer`.
    ///
    /// The scope id is the registration key (`category::identifier`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`](crate::Error::Url) or
    /// [`Error::Config`](crate::Error::Config) if no endpoint URL can be
    /// built, or [`Error::Disposed`](crate::Error::Disposed) if the
    /// multiplexer has stopped.
    pub fn subscribe(self, multiplexer: &Multiplexer) -> Result<Service> {
        self.seed();

        let url = match &self.base_address {
            Some(base) => autoconfig_url(base, self.key.identifier())?,
            None => multiplexer.config().endpoint_url(self.key.identifier())?,
        };

        let adapter = Arc::new(ScopeAdapter {
            values: self.values.clone(),
            observer: self.observer,
        });

        let subscription = multiplexer.subscribe(
            self.key.scope_id(),
            url,
            self.key.category(),
            self.parameters,
            adapter,
        )?;

        debug!(key = %self.key, "Scope service subscribed");

        Ok(Service {
            key: self.key,
            values: self.values,
            backend: Backend::Scope { subscription },
            disposed: AtomicBool::new(false),
        })
    }

    fn seed(&self) {
        for (name, value) in &self.initial_values {
            self.values.set(name, *value);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::TelemetryConfig;
    use crate::transport::MemoryConnector;

    #[test]
    fn test_builder_collects_parameters() {
        let builder = ServiceBuilder::new("controls", "pad-1")
            .parameter(ParameterDescriptor::new("x"))
            .parameters([ParameterDescriptor::new("y"), ParameterDescriptor::new("z")])
            .initial_value("x", 1.0);

        assert_eq!(builder.parameters.len(), 3);
        assert_eq!(builder.key.to_string(), "controls::pad-1");

        builder.seed();
        assert_eq!(builder.values.get("x"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_address_override() {
        let (connector, mut listener) = MemoryConnector::new();
        let bus = RegistrationBus::new(TelemetryConfig::new(), Arc::new(connector))
            .expect("bus");

        let _service = Service::builder("buttons", "go")
            .base_address("ws://192.168.0.2:6789")
            .register(&bus)
            .await
            .expect("register");

        let peer = listener.accept().await.expect("peer");
        assert_eq!(peer.url().as_str(), "ws://192.168.0.2:6789/go/autoconfig");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_rejects_bad_base() {
        let (connector, _listener) = MemoryConnector::new();
        let multiplexer = Multiplexer::spawn(TelemetryConfig::new(), Arc::new(connector))
            .expect("multiplexer");

        let result = Service::builder("oscilloscope", "1")
            .base_address("not a url")
            .subscribe(&multiplexer);
        assert!(result.is_err());
    }
}
