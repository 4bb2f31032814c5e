//! Registration bus for addressed control connections.
//!
//! Maps a [`RegistrationKey`] (`category::identifier`) to the one live
//! [`Connection`] registered under it, so callers can send a value to a
//! widget by name without holding its connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              RegistrationBus                │
//! │  ┌───────────────────────────────────────┐  │
//! │  │ controls::pad-1   → Connection (g=3)  │  │
//! │  │ controls::slider  → Connection (g=5)  │  │
//! │  │ buttons::trigger  → Connection (g=4)  │  │
//! │  └───────────────────────────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Registering a key again shuts the previous connection down before the
//! new one opens. Registrations for the same key are serialised, so
//! overlapping `register` calls never leave two transports live for one
//! key. Each registration carries a generation number so a superseded
//! owner can never tear down its replacement.
//!
//! Entries are only removed by [`RegistrationBus::unregister`],
//! [`RegistrationBus::remove`] or [`RegistrationBus::shutdown`]; there is
//! no eviction of stale entries.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::{TelemetryConfig, autoconfig_url};
use crate::error::{Error, Result};
use crate::identifiers::RegistrationKey;
use crate::protocol::{Handshake, ParameterDescriptor};

use super::connection::{Connection, ConnectionOptions, ConnectionState};
use super::connector::{Connector, WsConnector};
use super::observer::ConnectionObserver;

// ============================================================================
// Registration
// ============================================================================

/// Proof of one registration, returned by [`RegistrationBus::register`].
///
/// Operations taking a `Registration` only act while it is still the
/// current one for its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    key: RegistrationKey,
    generation: u64,
}

impl Registration {
    /// Returns the registration key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    /// Returns the generation number.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ============================================================================
// BusEntry
// ============================================================================

struct BusEntry {
    connection: Connection,
    generation: u64,
}

// ============================================================================
// RegistrationBus
// ============================================================================

/// Process-wide directory of control connections.
///
/// # Example
///
/// ```ignore
/// let bus = RegistrationBus::new(TelemetryConfig::new(), Arc::new(WsConnector::new()))?;
///
/// let key = RegistrationKey::new("controls", "pad-1");
/// let registration = bus.register(key, parameters, None, observer).await?;
///
/// bus.send("controls", "pad-1", "x", 0.25)?;
/// bus.unregister(&registration);
/// ```
pub struct RegistrationBus {
    config: TelemetryConfig,
    connector: Arc<dyn Connector>,
    entries: RwLock<FxHashMap<RegistrationKey, BusEntry>>,
    /// Held across a whole `register` for one key.
    key_locks: Mutex<FxHashMap<RegistrationKey, Arc<AsyncMutex<()>>>>,
    next_generation: AtomicU64,
}

static GLOBAL_BUS: OnceLock<Arc<RegistrationBus>> = OnceLock::new();

// ============================================================================
// RegistrationBus - Constructor
// ============================================================================

impl RegistrationBus {
    /// Creates a bus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(config: TelemetryConfig, connector: Arc<dyn Connector>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Self::build(config, connector))
    }

    /// Creates a bus with default config and the WebSocket connector.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Self::build(TelemetryConfig::default(), Arc::new(WsConnector::new()))
    }

    /// Returns the process-wide bus, creating it on first use.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_BUS.get_or_init(Self::with_defaults))
    }

    fn build(config: TelemetryConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            entries: RwLock::new(FxHashMap::default()),
            key_locks: Mutex::new(FxHashMap::default()),
            next_generation: AtomicU64::new(1),
        })
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}

// ============================================================================
// RegistrationBus - Registration
// ============================================================================

impl RegistrationBus {
    /// Registers a connection under `key`, replacing any previous one.
    ///
    /// The previous connection is fully shut down before the new transport
    /// is opened. The endpoint is `<base>/<identifier>/autoconfig`, where
    /// `base` defaults to the configured telemetry address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`]/[`Error::Config`] if no endpoint URL can be
    /// built, or [`Error::Json`] if the handshake cannot be serialized.
    pub async fn register(
        &self,
        key: RegistrationKey,
        parameters: Vec<ParameterDescriptor>,
        base_address: Option<&str>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Registration> {
        let url = match base_address {
            Some(base) => autoconfig_url(base, key.identifier())?,
            None => self.config.endpoint_url(key.identifier())?,
        };

        let key_lock = Arc::clone(self.key_locks.lock().entry(key.clone()).or_default());
        let _guard = key_lock.lock().await;

        let previous = self.entries.write().remove(&key);
        if let Some(previous) = previous {
            debug!(key = %key, generation = previous.generation, "Replacing registration");
            previous.connection.shutdown().await;
        }

        let handshake = Handshake::new(key.category(), parameters);
        let connection = Connection::open(
            url,
            handshake,
            ConnectionOptions::interactive(&self.config),
            Arc::clone(&self.connector),
            observer,
        )?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.entries.write().insert(
            key.clone(),
            BusEntry {
                connection,
                generation,
            },
        );

        info!(key = %key, generation, "Registered");

        Ok(Registration { key, generation })
    }

    /// Removes `registration` if it is still current. Returns `true` if
    /// removed.
    ///
    /// A superseded registration leaves its replacement untouched.
    pub fn unregister(&self, registration: &Registration) -> bool {
        let removed = {
            let mut entries = self.entries.write();
            match entries.get(&registration.key) {
                Some(entry) if entry.generation == registration.generation => {
                    entries.remove(&registration.key)
                }
                _ => None,
            }
        };

        match removed {
            Some(entry) => {
                entry.connection.dispose();
                debug!(key = %registration.key, generation = registration.generation, "Unregistered");
                true
            }
            None => {
                debug!(
                    key = %registration.key,
                    generation = registration.generation,
                    "Registration already superseded"
                );
                false
            }
        }
    }

    /// Removes whatever is registered under `key`. Returns `true` if an
    /// entry existed.
    pub fn remove(&self, key: &RegistrationKey) -> bool {
        let removed = self.entries.write().remove(key);

        match removed {
            Some(entry) => {
                entry.connection.dispose();
                debug!(key = %key, "Entry removed from bus");
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// RegistrationBus - Addressed Send
// ============================================================================

impl RegistrationBus {
    /// Sends a value to the connection registered as `category::identifier`.
    ///
    /// Delivery is best effort: `Ok` means the key was found, not that the
    /// value was written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressNotFound`] if nothing is registered under
    /// the key.
    pub fn send(&self, category: &str, identifier: &str, name: &str, value: f64) -> Result<()> {
        self.send_to(&RegistrationKey::new(category, identifier), name, value)
    }

    /// Sends a value to the connection registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressNotFound`] if nothing is registered under
    /// `key`.
    pub fn send_to(&self, key: &RegistrationKey, name: &str, value: f64) -> Result<()> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) => {
                entry.connection.send(name, value);
                Ok(())
            }
            None => {
                warn!(key = %key, name, "No registration for address");
                Err(Error::address_not_found(key.clone()))
            }
        }
    }

    /// Sends through `registration` if it is still current.
    ///
    /// Returns `true` if the value was handed to an open connection.
    pub fn send_as(&self, registration: &Registration, name: &str, value: f64) -> bool {
        let entries = self.entries.read();
        match entries.get(&registration.key) {
            Some(entry) if entry.generation == registration.generation => {
                entry.connection.send(name, value)
            }
            _ => {
                warn!(key = %registration.key, name, "Send through superseded registration ignored");
                false
            }
        }
    }
}

// ============================================================================
// RegistrationBus - Introspection
// ============================================================================

impl RegistrationBus {
    /// Returns `true` if something is registered under `key`.
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &RegistrationKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Returns the number of registrations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<RegistrationKey> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the state of the connection registered under `key`.
    #[must_use]
    pub fn connection_state(&self, key: &RegistrationKey) -> Option<ConnectionState> {
        self.entries.read().get(key).map(|e| e.connection.state())
    }
}

// ============================================================================
// RegistrationBus - Lifecycle
// ============================================================================

impl RegistrationBus {
    /// Shuts down every registered connection and empties the bus.
    pub async fn shutdown(&self) {
        info!("RegistrationBus shutting down");

        let entries: Vec<_> = {
            let mut map = self.entries.write();
            map.drain().collect()
        };

        for (key, entry) in entries {
            entry.connection.shutdown().await;
            debug!(key = %key, "Connection closed during shutdown");
        }

        info!("RegistrationBus shutdown complete");
    }
}

// ============================================================================
// Tests
// ============================================================================
