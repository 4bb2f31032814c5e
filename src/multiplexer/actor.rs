//! Multiplexer actor task.
//!
//! One tokio task owns every scope entry. Commands, connection signals and
//! flush ticks are all handled on that task, so the entry map needs no lock.
//!
//! ```text
//! ActorMessage ──►┐
//!                 │   ┌──────────────────────────────────┐
//! flush tick ────►├──►│ scopes: ScopeId → ScopeEntry     │──► WorkerEvent
//!                 │   │   connection, buffer, generation │
//! Signal ────────►┘   └──────────────────────────────────┘
//!   (from each scope's connection observer)
//! ```
//!
//! A `Disconnect` removes the entry before anything else runs, so a flush
//! can never see a torn-down scope. Signals carry the generation of the
//! connection that produced them; signals from a replaced connection are
//! dropped.
//!
//! Removed connections are shut down on their own task, which reports back
//! with `Signal::Retired`. A `Connect` for a scope whose previous connection
//! is still closing waits for that signal, so the old transport is released
//! before the new one opens while flushes for every other scope go on.

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::TelemetryConfig;
use crate::error::Error;
use crate::identifiers::ScopeId;
use crate::protocol::{Handshake, ParameterDescriptor, ValueUpdate, WorkerCommand, WorkerEvent};
use crate::transport::{Connection, ConnectionObserver, ConnectionOptions, Connector};

// ============================================================================
// ActorMessage
// ============================================================================

/// Message from a [`Multiplexer`](super::Multiplexer) handle to the actor.
#[derive(Debug)]
pub(crate) enum ActorMessage {
    /// A worker protocol command.
    Command(WorkerCommand),
    /// Report the number of live scopes.
    Count(oneshot::Sender<usize>),
    /// Close every scope and exit.
    Shutdown,
}

// ============================================================================
// Signal
// ============================================================================

/// Event raised by a scope's connection, tagged with its generation.
enum Signal {
    Sample {
        scope_id: ScopeId,
        generation: u64,
        update: ValueUpdate,
    },
    Opened {
        scope_id: ScopeId,
        generation: u64,
    },
    Failed {
        scope_id: ScopeId,
        generation: u64,
    },
    /// A removed connection finished shutting down.
    Retired {
        scope_id: ScopeId,
        generation: u64,
    },
}

/// Connection observer that forwards into the actor's signal queue.
struct ScopeForwarder {
    scope_id: ScopeId,
    generation: u64,
    signal_tx: mpsc::UnboundedSender<Signal>,
}

impl ConnectionObserver for ScopeForwarder {
    fn on_open(&self, _handshake: &Handshake) {
        let _ = self.signal_tx.send(Signal::Opened {
            scope_id: self.scope_id.clone(),
            generation: self.generation,
        });
    }

    fn on_message(&self, update: ValueUpdate) {
        let _ = self.signal_tx.send(Signal::Sample {
            scope_id: self.scope_id.clone(),
            generation: self.generation,
            update,
        });
    }

    fn on_error(&self, error: &Error) {
        // Malformed frames are already logged by the connection
        if !error.is_connection_error() {
            return;
        }

        let _ = self.signal_tx.send(Signal::Failed {
            scope_id: self.scope_id.clone(),
            generation: self.generation,
        });
    }
}

// ============================================================================
// ScopeEntry
// ============================================================================

struct ScopeEntry {
    connection: Connection,
    buffer: Vec<ValueUpdate>,
    generation: u64,
}

/// Parameters of a `Connect` command.
struct ConnectRequest {
    url: Url,
    kind: String,
    parameters: Vec<ParameterDescriptor>,
}

/// A removed connection that is still shutting down.
struct Retiring {
    generation: u64,
    task: JoinHandle<()>,
    /// Connect to issue once the shutdown completes.
    pending: Option<ConnectRequest>,
}

// ============================================================================
// Actor
// ============================================================================

/// Task-side state of the multiplexer.
pub(crate) struct Actor {
    config: TelemetryConfig,
    connector: Arc<dyn Connector>,
    scopes: FxHashMap<ScopeId, ScopeEntry>,
    retiring: FxHashMap<ScopeId, Retiring>,
    next_generation: u64,
    inbox: mpsc::UnboundedReceiver<ActorMessage>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl Actor {
    /// Spawns the actor. Events are emitted on `events_tx` until the inbox
    /// closes or a `Shutdown` arrives.
    pub(crate) fn spawn(
        config: TelemetryConfig,
        connector: Arc<dyn Connector>,
        inbox: mpsc::UnboundedReceiver<ActorMessage>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> JoinHandle<()> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let actor = Self {
            config,
            connector,
            scopes: FxHashMap::default(),
            retiring: FxHashMap::default(),
            next_generation: 1,
            inbox,
            signal_tx,
            signal_rx,
            events_tx,
        };

        tokio::spawn(actor.run())
    }

    async fn run(mut self) {
        let mut ticker = interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            flush_ms = self.config.flush_interval.as_millis() as u64,
            "Multiplexer started"
        );

        loop {
            tokio::select! {
                biased;

                message = self.inbox.recv() => match message {
                    Some(ActorMessage::Command(command)) => self.handle_command(command),
                    Some(ActorMessage::Count(reply)) => {
                        let _ = reply.send(self.scope_count());
                    }
                    Some(ActorMessage::Shutdown) | None => break,
                },

                _ = ticker.tick() => self.flush(),

                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal),
            }
        }

        self.close_all().await;
        info!("Multiplexer stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Connect {
                scope_id,
                url,
                kind,
                parameters,
            } => self.connect(
                scope_id,
                ConnectRequest {
                    url,
                    kind,
                    parameters,
                },
            ),
            WorkerCommand::Disconnect { scope_id } => self.disconnect(&scope_id),
        }
    }

    fn connect(&mut self, scope_id: ScopeId, request: ConnectRequest) {
        if let Some(previous) = self.scopes.remove(&scope_id) {
            debug!(scope_id = %scope_id, generation = previous.generation, "Replacing scope");
            self.retire(scope_id.clone(), previous);
        }

        if let Some(retiring) = self.retiring.get_mut(&scope_id) {
            trace!(scope_id = %scope_id, "Connect waits for previous connection to close");
            retiring.pending = Some(request);
            return;
        }

        self.open(scope_id, request);
    }

    fn open(&mut self, scope_id: ScopeId, request: ConnectRequest) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let forwarder = Arc::new(ScopeForwarder {
            scope_id: scope_id.clone(),
            generation,
            signal_tx: self.signal_tx.clone(),
        });

        let opened = Connection::open(
            request.url,
            Handshake::new(request.kind, request.parameters),
            ConnectionOptions::scope(&self.config),
            Arc::clone(&self.connector),
            forwarder,
        );

        match opened {
            Ok(connection) => {
                debug!(scope_id = %scope_id, generation, url = %connection.url(), "Scope connected");
                self.scopes.insert(
                    scope_id,
                    ScopeEntry {
                        connection,
                        buffer: Vec::new(),
                        generation,
                    },
                );
            }
            Err(e) => {
                warn!(scope_id = %scope_id, error = %e, "Cannot open scope");
                self.emit(WorkerEvent::Error { scope_id });
            }
        }
    }

    fn disconnect(&mut self, scope_id: &ScopeId) {
        if let Some(retiring) = self.retiring.get_mut(scope_id)
            && retiring.pending.take().is_some()
        {
            debug!(scope_id = %scope_id, "Pending connect cancelled");
        }

        match self.scopes.remove(scope_id) {
            Some(entry) => {
                debug!(
                    scope_id = %scope_id,
                    dropped = entry.buffer.len(),
                    "Scope disconnected"
                );
                self.retire(scope_id.clone(), entry);
            }
            None => trace!(scope_id = %scope_id, "Disconnect for unknown scope"),
        }
    }

    /// Shuts `entry` down on its own task.
    ///
    /// Callbacks stop at once; `Signal::Retired` follows once the transport
    /// is released.
    fn retire(&mut self, scope_id: ScopeId, entry: ScopeEntry) {
        let generation = entry.generation;
        entry.connection.dispose();

        let signal_tx = self.signal_tx.clone();
        let retired_id = scope_id.clone();
        let task = tokio::spawn(async move {
            entry.connection.shutdown().await;
            let _ = signal_tx.send(Signal::Retired {
                scope_id: retired_id,
                generation,
            });
        });

        self.retiring.insert(
            scope_id,
            Retiring {
                generation,
                task,
                pending: None,
            },
        );
    }

    fn retired(&mut self, scope_id: ScopeId, generation: u64) {
        let current = self
            .retiring
            .get(&scope_id)
            .is_some_and(|r| r.generation == generation);
        if !current {
            trace!(scope_id = %scope_id, generation, "Stale retire signal dropped");
            return;
        }

        trace!(scope_id = %scope_id, generation, "Previous connection released");
        if let Some(Retiring {
            pending: Some(request),
            ..
        }) = self.retiring.remove(&scope_id)
        {
            self.open(scope_id, request);
        }
    }

    /// Live scopes plus scopes waiting for their previous connection to close.
    fn scope_count(&self) -> usize {
        let waiting = self
            .retiring
            .values()
            .filter(|r| r.pending.is_some())
            .count();
        self.scopes.len() + waiting
    }

    async fn close_all(&mut self) {
        for (scope_id, entry) in self.scopes.drain() {
            entry.connection.shutdown().await;
            debug!(scope_id = %scope_id, "Scope closed during shutdown");
        }

        for (scope_id, retiring) in self.retiring.drain() {
            if let Err(e) = retiring.task.await {
                warn!(scope_id = %scope_id, error = %e, "Retiring connection task failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------------

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Sample {
                scope_id,
                generation,
                update,
            } => {
                if let Some(entry) = self.current(&scope_id, generation) {
                    entry.buffer.push(update);
                }
            }
            Signal::Opened {
                scope_id,
                generation,
            } => {
                if self.current(&scope_id, generation).is_some() {
                    self.emit(WorkerEvent::Open { scope_id });
                }
            }
            Signal::Failed {
                scope_id,
                generation,
            } => {
                if self.current(&scope_id, generation).is_some() {
                    self.emit(WorkerEvent::Error { scope_id });
                }
            }
            Signal::Retired {
                scope_id,
                generation,
            } => self.retired(scope_id, generation),
        }
    }

    /// Returns the entry for `scope_id` if `generation` is its live connection.
    fn current(&mut self, scope_id: &ScopeId, generation: u64) -> Option<&mut ScopeEntry> {
        let entry = self
            .scopes
            .get_mut(scope_id)
            .filter(|e| e.generation == generation);
        if entry.is_none() {
            trace!(scope_id = %scope_id, generation, "Signal from removed or replaced connection dropped");
        }
        entry
    }

    // ------------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------------

    /// Emits one `Data` event per scope with buffered samples.
    fn flush(&mut self) {
        for (scope_id, entry) in &mut self.scopes {
            if entry.buffer.is_empty() {
                continue;
            }

            let messages = mem::take(&mut entry.buffer);
            trace!(scope_id = %scope_id, count = messages.len(), "Flushing batch");

            let event = WorkerEvent::Data {
                scope_id: scope_id.clone(),
                messages,
            };
            if self.events_tx.send(event).is_err() {
                trace!("Event receiver dropped");
            }
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::sleep;

    use crate::transport::{MemoryConnector, MemoryEvent, MemoryListener};

    struct Harness {
        inbox: mpsc::UnboundedSender<ActorMessage>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        connector: MemoryConnector,
        listener: MemoryListener,
        task: JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (connector, listener) = MemoryConnector::new();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = Actor::spawn(
            TelemetryConfig::new(),
            Arc::new(connector.clone()),
            inbox_rx,
            events_tx,
        );

        Harness {
            inbox: inbox_tx,
            events: events_rx,
            connector,
            listener,
            task,
        }
    }

    fn connect(scope: &str) -> ActorMessage {
        ActorMessage::Command(WorkerCommand::Connect {
            scope_id: ScopeId::from(scope),
            url: Url::parse(&format!("ws://memory/{scope}/autoconfig")).expect("url"),
            kind: "oscilloscope".into(),
            parameters: vec![ParameterDescriptor::new("data").streaming()],
        })
    }

    fn disconnect(scope: &str) -> ActorMessage {
        ActorMessage::Command(WorkerCommand::Disconnect {
            scope_id: ScopeId::from(scope),
        })
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_batch_per_tick() {
        let mut h = harness();
        h.inbox.send(connect("oscilloscope::1")).expect("send");

        let mut peer = h.listener.accept().await.expect("peer");
        peer.handshake().await.expect("handshake");
        sleep(Duration::from_millis(1)).await;
        assert_eq!(
            drain(&mut h.events),
            vec![WorkerEvent::Open {
                scope_id: ScopeId::from("oscilloscope::1")
            }]
        );

        peer.send_text(r#"{"on":"data","value":1}"#);
        peer.send_text(r#"{"on":"data","value":2}"#);
        peer.send_text(r#"{"on":"data","value":3}"#);
        sleep(Duration::from_millis(20)).await;

        assert_eq!(
            drain(&mut h.events),
            vec![WorkerEvent::Data {
                scope_id: ScopeId::from("oscilloscope::1"),
                messages: vec![
                    ValueUpdate::new("data", 1.0),
                    ValueUpdate::new("data", 2.0),
                    ValueUpdate::new("data", 3.0),
                ],
            }]
        );

        sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_discards_buffer() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");

        let peer = h.listener.accept().await.expect("peer");
        sleep(Duration::from_millis(1)).await;
        drain(&mut h.events);

        peer.send_update("data", 1.0);
        // Let the sample reach the buffer without crossing a tick boundary
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        h.inbox.send(disconnect("scope::a")).expect("send");
        sleep(Duration::from_millis(50)).await;

        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.connector.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_do_not_leak() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");
        h.inbox.send(connect("scope::b")).expect("send");

        let a = h.listener.accept().await.expect("peer a");
        let b = h.listener.accept().await.expect("peer b");
        let (a, b) = if a.url().path().contains("scope::a") { (a, b) } else { (b, a) };
        sleep(Duration::from_millis(1)).await;
        drain(&mut h.events);

        a.send_update("data", 1.0);
        b.send_update("data", 2.0);
        sleep(Duration::from_millis(20)).await;

        let mut batches: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|event| match event {
                WorkerEvent::Data { scope_id, messages } => Some((scope_id, messages)),
                _ => None,
            })
            .collect();
        batches.sort_by(|x, y| x.0.cmp(&y.0));

        assert_eq!(
            batches,
            vec![
                (ScopeId::from("scope::a"), vec![ValueUpdate::new("data", 1.0)]),
                (ScopeId::from("scope::b"), vec![ValueUpdate::new("data", 2.0)]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_connection() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");
        let _first = h.listener.accept().await.expect("first");
        sleep(Duration::from_millis(1)).await;

        h.inbox.send(connect("scope::a")).expect("send");
        let second = h.listener.accept().await.expect("second");

        assert_eq!(
            h.connector.log(),
            vec![MemoryEvent::Opened(0), MemoryEvent::Closed(0), MemoryEvent::Opened(1)]
        );

        sleep(Duration::from_millis(1)).await;
        drain(&mut h.events);
        second.send_update("data", 5.0);
        sleep(Duration::from_millis(20)).await;

        assert_eq!(
            drain(&mut h.events),
            vec![WorkerEvent::Data {
                scope_id: ScopeId::from("scope::a"),
                messages: vec![ValueUpdate::new("data", 5.0)],
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_close_does_not_stall_other_scopes() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");
        h.inbox.send(connect("scope::b")).expect("send");

        let first = h.listener.accept().await.expect("peer");
        let second = h.listener.accept().await.expect("peer");
        let (a, b) = if first.url().path().contains("scope::a") {
            (first, second)
        } else {
            (second, first)
        };
        sleep(Duration::from_millis(1)).await;
        drain(&mut h.events);

        // Replacing `a` now takes the whole close timeout
        h.connector.set_stalling_close(true);
        h.inbox.send(connect("scope::a")).expect("send");
        sleep(Duration::from_millis(1)).await;

        b.send_update("data", 7.0);
        sleep(Duration::from_millis(32)).await;

        assert_eq!(
            drain(&mut h.events),
            vec![WorkerEvent::Data {
                scope_id: ScopeId::from("scope::b"),
                messages: vec![ValueUpdate::new("data", 7.0)],
            }]
        );
        assert_eq!(h.connector.opened(), 2);

        let (tx, rx) = oneshot::channel();
        h.inbox.send(ActorMessage::Count(tx)).expect("send");
        assert_eq!(rx.await.expect("count"), 2);

        // The replacement opens only after the old transport is released
        h.connector.set_stalling_close(false);
        let _replacement = h.listener.accept().await.expect("replacement");
        let log = h.connector.log();
        let closed = log
            .iter()
            .position(|e| *e == MemoryEvent::Closed(a.index()))
            .expect("old transport closed");
        let reopened = log
            .iter()
            .position(|e| *e == MemoryEvent::Opened(2))
            .expect("replacement opened");
        assert!(closed < reopened, "log: {log:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_connect() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");
        let _first = h.listener.accept().await.expect("peer");
        sleep(Duration::from_millis(1)).await;

        h.connector.set_stalling_close(true);
        h.inbox.send(connect("scope::a")).expect("send");
        h.inbox.send(disconnect("scope::a")).expect("send");

        let (tx, rx) = oneshot::channel();
        h.inbox.send(ActorMessage::Count(tx)).expect("send");
        assert_eq!(rx.await.expect("count"), 0);

        h.connector.set_stalling_close(false);
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(h.connector.opened(), 1);
        assert_eq!(h.connector.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_reported() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");
        let peer = h.listener.accept().await.expect("peer");
        sleep(Duration::from_millis(1)).await;
        drain(&mut h.events);

        // Malformed frames stay silent; transport errors are reported
        peer.send_binary(vec![9u8, b'x']);
        peer.fail("reset");
        sleep(Duration::from_millis(1)).await;

        assert_eq!(
            drain(&mut h.events),
            vec![WorkerEvent::Error {
                scope_id: ScopeId::from("scope::a")
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_and_shutdown() {
        let mut h = harness();
        h.inbox.send(connect("scope::a")).expect("send");
        h.inbox.send(connect("scope::b")).expect("send");
        let _peers = (h.listener.accept().await, h.listener.accept().await);

        let (tx, rx) = oneshot::channel();
        h.inbox.send(ActorMessage::Count(tx)).expect("send");
        assert_eq!(rx.await.expect("count"), 2);

        h.inbox.send(ActorMessage::Shutdown).expect("send");
        h.task.await.expect("actor task");
        assert_eq!(h.connector.live(), 0);
    }
}
