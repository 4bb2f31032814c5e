//! Caller-side handle to the multiplexer actor.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::identifiers::ScopeId;
use crate::protocol::{ParameterDescriptor, ValueUpdate, WorkerCommand, WorkerEvent};
use crate::transport::{Connector, ObserverSlot, WsConnector};

use super::actor::{Actor, ActorMessage};

// ============================================================================
// ScopeObserver
// ============================================================================

/// Receives the events of one subscribed scope.
///
/// Calls for one scope are sequential. Batches arrive in flush order.
pub trait ScopeObserver: Send + Sync {
    /// Every sample buffered during one flush period, in arrival order.
    fn on_batch(&self, _messages: &[ValueUpdate]) {}

    /// The scope's connection sent its handshake.
    fn on_open(&self) {}

    /// The scope's transport reported an error.
    fn on_error(&self) {}
}

/// Observer that ignores every event.
impl ScopeObserver for () {}

type ListenerSlot = Arc<ObserverSlot<dyn ScopeObserver>>;
type Listeners = Arc<RwLock<FxHashMap<ScopeId, ListenerSlot>>>;

// ============================================================================
// MultiplexerInner
// ============================================================================

struct MultiplexerInner {
    config: TelemetryConfig,
    command_tx: mpsc::UnboundedSender<ActorMessage>,
    listeners: Listeners,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MultiplexerInner {
    fn drop(&mut self) {
        // Last handle gone
        let _ = self.command_tx.send(ActorMessage::Shutdown);
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Handle to a running batching multiplexer.
///
/// Cloning is cheap; the actor stops when the last handle (including the
/// ones held by live [`ScopeSubscription`]s) is dropped.
///
/// # Example
///
/// ```ignore
/// let multiplexer = Multiplexer::spawn(TelemetryConfig::new(), Arc::new(WsConnector::new()))?;
///
/// let subscription = multiplexer.subscribe(
///     ScopeId::from("oscilloscope::1"),
///     config.endpoint_url("1")?,
///     "oscilloscope",
///     vec![ParameterDescriptor::new("data").streaming()],
///     Arc::new(MyScope),
/// )?;
///
/// // MyScope::on_batch receives at most one batch per flush interval
/// subscription.dispose();
/// ```
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MultiplexerInner>,
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("listeners", &self.inner.listeners.read().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Multiplexer - Constructor
// ============================================================================

impl Multiplexer {
    /// Starts the actor and its event dispatcher.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate; the actor
    /// is not started.
    pub fn spawn(config: TelemetryConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        Ok(Self::start(config, connector))
    }

    /// Starts a multiplexer with default config and the WebSocket connector.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::start(TelemetryConfig::default(), Arc::new(WsConnector::new()))
    }

    fn start(config: TelemetryConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listeners: Listeners = Arc::new(RwLock::new(FxHashMap::default()));

        let task = Actor::spawn(config.clone(), connector, command_rx, events_tx);
        tokio::spawn(dispatch(events_rx, Arc::clone(&listeners)));

        Self {
            inner: Arc::new(MultiplexerInner {
                config,
                command_tx,
                listeners,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }
}

// ============================================================================
// Multiplexer - Public API
// ============================================================================

impl Multiplexer {
    /// Opens (or replaces) a scope and routes its events to `observer`.
    ///
    /// A previous subscription to the same scope stops receiving events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the actor has stopped.
    pub fn subscribe(
        &self,
        scope_id: ScopeId,
        url: Url,
        kind: impl Into<String>,
        parameters: Vec<ParameterDescriptor>,
        observer: Arc<dyn ScopeObserver>,
    ) -> Result<ScopeSubscription> {
        let slot: ListenerSlot = Arc::new(ObserverSlot::new(observer));

        let previous = self
            .inner
            .listeners
            .write()
            .insert(scope_id.clone(), Arc::clone(&slot));
        if let Some(previous) = previous {
            debug!(scope_id = %scope_id, "Scope listener replaced");
            previous.clear();
        }

        let posted = self.post(WorkerCommand::Connect {
            scope_id: scope_id.clone(),
            url,
            kind: kind.into(),
            parameters,
        });

        if let Err(e) = posted {
            self.inner.listeners.write().remove(&scope_id);
            return Err(e);
        }

        Ok(ScopeSubscription {
            scope_id,
            slot,
            multiplexer: self.clone(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Posts a raw worker command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the actor has stopped.
    pub fn post(&self, command: WorkerCommand) -> Result<()> {
        trace!(scope_id = %command.scope_id(), "Posting command");
        self.inner
            .command_tx
            .send(ActorMessage::Command(command))
            .map_err(|_| Error::Disposed)
    }

    /// Tears a scope down and drops its listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the actor has stopped.
    pub fn disconnect(&self, scope_id: &ScopeId) -> Result<()> {
        let removed = self.inner.listeners.write().remove(scope_id);
        if let Some(slot) = removed {
            slot.clear();
        }

        self.post(WorkerCommand::Disconnect {
            scope_id: scope_id.clone(),
        })
    }

    /// Returns the number of live scopes in the actor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the actor has stopped.
    pub async fn scope_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(ActorMessage::Count(tx))
            .map_err(|_| Error::Disposed)?;

        rx.await.map_err(|_| Error::Disposed)
    }

    /// Stops the actor and waits until every scope is closed.
    ///
    /// Other handles become inert.
    pub async fn shutdown(&self) {
        let _ = self.inner.command_tx.send(ActorMessage::Shutdown);

        let task = self.inner.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Multiplexer task failed");
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes actor events to scope listeners until the actor exits.
async fn dispatch(mut events_rx: mpsc::UnboundedReceiver<WorkerEvent>, listeners: Listeners) {
    while let Some(event) = events_rx.recv().await {
        let slot = listeners.read().get(event.scope_id()).cloned();
        let Some(slot) = slot else {
            trace!(scope_id = %event.scope_id(), "Event without listener dropped");
            continue;
        };

        slot.with(|observer| match &event {
            WorkerEvent::Data { messages, .. } => observer.on_batch(messages),
            WorkerEvent::Open { .. } => observer.on_open(),
            WorkerEvent::Error { .. } => observer.on_error(),
        });
    }

    trace!("Dispatcher terminated");
}

// ============================================================================
// ScopeSubscription
// ============================================================================

/// One consumer's subscription to a scope. Dropping it disconnects.
pub struct ScopeSubscription {
    scope_id: ScopeId,
    slot: ListenerSlot,
    multiplexer: Multiplexer,
    disposed: AtomicBool,
}

impl fmt::Debug for ScopeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeSubscription")
            .field("scope_id", &self.scope_id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ScopeSubscription {
    /// Returns the subscribed scope.
    #[inline]
    #[must_use]
    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    /// Returns `true` once disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Returns `true` while this subscription receives the scope's events.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.slot.is_set()
    }

    /// Stops events and disconnects the scope. Idempotent.
    ///
    /// If a newer subscription has replaced this one, the scope stays
    /// connected for it.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.slot.clear();

        let owned = {
            let mut listeners = self.multiplexer.inner.listeners.write();
            match listeners.get(&self.scope_id) {
                Some(current) if Arc::ptr_eq(current, &self.slot) => {
                    listeners.remove(&self.scope_id);
                    true
                }
                _ => false,
            }
        };

        if !owned {
            debug!(scope_id = %self.scope_id, "Superseded subscription disposed");
            return;
        }

        let posted = self.multiplexer.post(WorkerCommand::Disconnect {
            scope_id: self.scope_id.clone(),
        });
        if posted.is_err() {
            trace!(scope_id = %self.scope_id, "Multiplexer already stopped");
        }
    }
}

impl Drop for ScopeSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// Tests
// ============================================================================
