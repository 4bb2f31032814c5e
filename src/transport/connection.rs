//! Connection lifecycle and event loop.
//!
//! A [`Connection`] owns one transport to one telemetry endpoint. It spawns
//! a tokio task that:
//!
//! - connects through a [`Connector`] and sends the registration handshake
//! - decodes inbound frames and delivers them to the observer, one call per
//!   message, in receipt order
//! - writes outbound control values
//! - reconnects after a fixed delay when the transport is lost
//!
//! # States
//!
//! ```text
//! Idle → Connecting → Open → Closing → Closed
//!            ▲                            │
//!            └──── ReconnectScheduled ◄───┘   (unless disposed or closed by hand)
//!
//! any state ── dispose() ──► Disposed
//! ```
//!
//! Disposal is immediate for callbacks: once [`Connection::dispose`]
//! returns, the observer is never called again, even if the transport is
//! still closing in the background.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::{
    CLOSE_TIMEOUT, CONNECT_TIMEOUT, ControlEncoding, INTERACTIVE_RECONNECT_DELAY, TelemetryConfig,
};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Frame, Handshake, codec};

use super::connector::{Connector, FrameSink, Transport};
use super::observer::{ConnectionObserver, ObserverSlot};

type StdResult<T, E> = std::result::Result<T, E>;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Timing and encoding options for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Delay before reconnecting after the transport is lost.
    pub reconnect_delay: Duration,
    /// Maximum time a connect attempt may take.
    pub connect_timeout: Duration,
    /// Maximum time spent closing the transport gracefully.
    pub close_timeout: Duration,
    /// Encoding of outbound control values.
    pub encoding: ControlEncoding,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: INTERACTIVE_RECONNECT_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
            encoding: ControlEncoding::Binary,
        }
    }
}

impl ConnectionOptions {
    /// Options for interactive widgets (buttons, pads, sliders).
    #[must_use]
    pub fn interactive(config: &TelemetryConfig) -> Self {
        Self {
            reconnect_delay: config.interactive_reconnect_delay,
            connect_timeout: config.connect_timeout,
            close_timeout: config.close_timeout,
            encoding: config.control_encoding,
        }
    }

    /// Options for multiplexed telemetry scopes.
    #[must_use]
    pub fn scope(config: &TelemetryConfig) -> Self {
        Self {
            reconnect_delay: config.scope_reconnect_delay,
            ..Self::interactive(config)
        }
    }

    /// Overrides the reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Observable lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, event loop not started yet.
    Idle,
    /// Waiting for the connector.
    Connecting,
    /// Handshake sent; values flow.
    Open,
    /// Transport being torn down.
    Closing,
    /// Closed by hand; waits for [`Connection::reopen`].
    Closed,
    /// Transport lost; a reconnect is pending.
    ReconnectScheduled,
    /// Terminal.
    Disposed,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a control value.
    Send { name: String, value: f64 },
    /// Close the transport, stay closed.
    Close,
    /// Connect now, cancelling any pending reconnect.
    Reopen,
    /// Close and exit.
    Dispose,
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the handle and its event loop.
struct Shared {
    id: ConnectionId,
    url: Url,
    state: Mutex<ConnectionState>,
    disposed: AtomicBool,
    observer: ObserverSlot<dyn ConnectionObserver>,
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Disposed is terminal; later transitions are ignored.
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != ConnectionState::Disposed {
            trace!(id = %self.id, from = ?*state, to = ?next, "State change");
            *state = next;
        }
    }

    fn notify_error(&self, error: &Error) {
        self.observer.with(|o| o.on_error(error));
    }

    fn drop_send(&self, name: &str) {
        warn!(id = %self.id, url = %self.url, name, "WebSocket not open, cannot send");
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One auto-reconnecting transport to one telemetry endpoint.
///
/// Exclusively owned; dropping it disposes it.
///
/// # Example
///
/// ```ignore
/// let connection = Connection::open(
///     config.endpoint_url("widget-7")?,
///     Handshake::new("controls", vec![ParameterDescriptor::new("x").with_range(0.0, 127.0)]),
///     ConnectionOptions::interactive(&config),
///     Arc::new(WsConnector::new()),
///     Arc::new(MyObserver),
/// )?;
///
/// connection.send("x", 64.0);
/// connection.dispose();
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    handshake: Handshake,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("url", &self.shared.url.as_str())
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection and starts its event loop.
    ///
    /// Must be called within a tokio runtime. The handshake is sent on
    /// every successful (re)connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the handshake cannot be serialized.
    pub fn open(
        url: Url,
        handshake: Handshake,
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Self> {
        let handshake_text = handshake.to_json()?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            id: ConnectionId::generate(),
            url,
            state: Mutex::new(ConnectionState::Idle),
            disposed: AtomicBool::new(false),
            observer: ObserverSlot::new(observer),
        });

        debug!(id = %shared.id, url = %shared.url, kind = %handshake.kind, "Connection created");

        let event_loop = EventLoop {
            shared: Arc::clone(&shared),
            handshake: handshake.clone(),
            handshake_text,
            options,
            connector,
            command_rx,
        };

        let task = tokio::spawn(event_loop.run());

        Ok(Self {
            shared,
            handshake,
            command_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Returns the unique id of this connection.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Returns the handshake sent on open.
    #[inline]
    #[must_use]
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns `true` while values can be sent.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns `true` once disposed.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Sends a control value, best effort.
    ///
    /// Returns `false` (and logs a warning) when the connection is not open;
    /// the value is dropped, not queued.
    pub fn send(&self, name: &str, value: f64) -> bool {
        if self.shared.is_disposed() {
            debug!(id = %self.shared.id, name, "Send on disposed connection ignored");
            return false;
        }

        if self.state() != ConnectionState::Open {
            self.shared.drop_send(name);
            return false;
        }

        self.command_tx
            .send(ConnectionCommand::Send {
                name: name.to_string(),
                value,
            })
            .is_ok()
    }

    /// Closes the transport without scheduling a reconnect.
    ///
    /// [`Self::reopen`] connects again. Idempotent.
    pub fn close(&self) {
        if !self.shared.is_disposed() {
            let _ = self.command_tx.send(ConnectionCommand::Close);
        }
    }

    /// Connects now, cancelling any pending reconnect timer.
    ///
    /// No-op while connecting or open.
    pub fn reopen(&self) {
        if !self.shared.is_disposed() {
            let _ = self.command_tx.send(ConnectionCommand::Reopen);
        }
    }

    /// Disposes the connection. Idempotent.
    ///
    /// Cancels any pending reconnect, closes the transport in the
    /// background and guarantees no observer callback fires after return.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.observer.clear();
        *self.shared.state.lock() = ConnectionState::Disposed;
        let _ = self.command_tx.send(ConnectionCommand::Dispose);

        debug!(id = %self.shared.id, url = %self.shared.url, "Connection disposed");
    }

    /// Disposes and waits until the transport has been released.
    pub async fn shutdown(&self) {
        self.dispose();

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(id = %self.shared.id, error = %e, "Connection task failed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Why a session or connect attempt ended.
enum SessionEnd {
    /// Transport lost or never established; reconnect.
    Lost,
    /// Closed by hand.
    Closed,
    /// Disposed; exit.
    Disposed,
}

/// Why a wait ended.
enum Wake {
    Elapsed,
    Reopen,
    Close,
    Exit,
}

/// Task-side state of a connection.
struct EventLoop {
    shared: Arc<Shared>,
    handshake: Handshake,
    handshake_text: String,
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
}

impl EventLoop {
    /// Runs until disposed.
    async fn run(mut self) {
        let mut closed_by_hand = false;

        loop {
            if self.shared.is_disposed() {
                break;
            }

            if closed_by_hand {
                match self.wait(None).await {
                    Wake::Reopen => closed_by_hand = false,
                    Wake::Elapsed | Wake::Close => continue,
                    Wake::Exit => break,
                }
            }

            let end = match self.connect().await {
                Ok(transport) => self.run_session(transport).await,
                Err(end) => end,
            };

            match end {
                SessionEnd::Disposed => break,
                SessionEnd::Closed => {
                    self.shared.set_state(ConnectionState::Closed);
                    closed_by_hand = true;
                }
                SessionEnd::Lost => {
                    if self.shared.is_disposed() {
                        break;
                    }

                    self.shared.set_state(ConnectionState::ReconnectScheduled);
                    debug!(
                        id = %self.shared.id,
                        delay_ms = self.options.reconnect_delay.as_millis() as u64,
                        "Reconnect scheduled"
                    );

                    match self.wait(Some(self.options.reconnect_delay)).await {
                        Wake::Elapsed | Wake::Reopen => {}
                        Wake::Close => {
                            self.shared.set_state(ConnectionState::Closed);
                            closed_by_hand = true;
                        }
                        Wake::Exit => break,
                    }
                }
            }
        }

        self.shared.set_state(ConnectionState::Disposed);
        debug!(id = %self.shared.id, "Event loop terminated");
    }

    /// Waits for a command, or for `delay` to elapse.
    ///
    /// Sends arriving meanwhile are dropped.
    async fn wait(&mut self, delay: Option<Duration>) -> Wake {
        let timer = async {
            match delay {
                Some(delay) => sleep(delay).await,
                None => pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return Wake::Elapsed,

                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Send { name, .. }) => self.shared.drop_send(&name),
                    Some(ConnectionCommand::Reopen) => return Wake::Reopen,
                    Some(ConnectionCommand::Close) => return Wake::Close,
                    Some(ConnectionCommand::Dispose) | None => return Wake::Exit,
                },
            }
        }
    }

    /// Runs one connect attempt, interruptible by commands.
    async fn connect(&mut self) -> StdResult<Transport, SessionEnd> {
        self.shared.set_state(ConnectionState::Connecting);
        debug!(id = %self.shared.id, url = %self.shared.url, "Connecting");

        let connect_timeout = self.options.connect_timeout;
        let attempt = timeout(connect_timeout, self.connector.connect(&self.shared.url));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    let error = match result {
                        Ok(Ok(transport)) => return Ok(transport),
                        Ok(Err(e)) => e,
                        Err(_) => Error::connection_timeout(connect_timeout.as_millis() as u64),
                    };

                    warn!(id = %self.shared.id, url = %self.shared.url, error = %error, "Connect failed");
                    self.shared.notify_error(&error);
                    return Err(SessionEnd::Lost);
                }

                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Send { name, .. }) => self.shared.drop_send(&name),
                    Some(ConnectionCommand::Reopen) => {}
                    Some(ConnectionCommand::Close) => return Err(SessionEnd::Closed),
                    Some(ConnectionCommand::Dispose) | None => return Err(SessionEnd::Disposed),
                },
            }
        }
    }

    /// Sends the handshake, then pumps frames and commands until the
    /// transport ends or a command stops it.
    async fn run_session(&mut self, transport: Transport) -> SessionEnd {
        let Transport {
            mut sink,
            mut stream,
        } = transport;

        if self.shared.is_disposed() {
            self.close_sink(&mut sink).await;
            return SessionEnd::Disposed;
        }

        if let Err(e) = sink.send(Frame::Text(self.handshake_text.clone())).await {
            warn!(id = %self.shared.id, error = %e, "Handshake failed");
            self.shared.notify_error(&e);
            return SessionEnd::Lost;
        }

        self.shared.set_state(ConnectionState::Open);
        info!(id = %self.shared.id, url = %self.shared.url, kind = %self.handshake.kind, "Connection open");
        self.shared.observer.with(|o| o.on_open(&self.handshake));

        let end = loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Send { name, value }) => {
                        if !self.write_value(&mut sink, &name, value).await {
                            break SessionEnd::Lost;
                        }
                    }
                    Some(ConnectionCommand::Reopen) => {}
                    Some(ConnectionCommand::Close) => break SessionEnd::Closed,
                    Some(ConnectionCommand::Dispose) | None => break SessionEnd::Disposed,
                },

                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.deliver(&frame),
                    Some(Err(e)) => {
                        error!(id = %self.shared.id, error = %e, "WebSocket error");
                        self.shared.notify_error(&e);
                        break SessionEnd::Lost;
                    }
                    None => {
                        debug!(id = %self.shared.id, "WebSocket closed by remote");
                        break SessionEnd::Lost;
                    }
                },
            }
        };

        self.shared.set_state(ConnectionState::Closing);
        self.close_sink(&mut sink).await;
        drop(stream);

        self.shared.observer.with(|o| o.on_close());
        end
    }

    /// Decodes one inbound frame and hands it to the observer.
    ///
    /// Malformed frames are dropped; the session continues.
    fn deliver(&self, frame: &Frame) {
        match frame.decode() {
            Ok(update) => {
                trace!(id = %self.shared.id, on = %update.on, value = update.value, "Value received");
                self.shared.observer.with(|o| o.on_message(update));
            }
            Err(e) => {
                warn!(id = %self.shared.id, error = %e, len = frame.len(), "Dropping malformed frame");
                self.shared.notify_error(&e);
            }
        }
    }

    /// Encodes and writes one control value.
    ///
    /// Returns `false` if the transport failed.
    async fn write_value(&self, sink: &mut FrameSink, name: &str, value: f64) -> bool {
        let frame = match self.options.encoding {
            ControlEncoding::Binary => codec::encode_binary(name, value).map(Frame::Binary),
            ControlEncoding::Json => codec::encode_text(name, value).map(Frame::Text),
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %self.shared.id, name, error = %e, "Cannot encode control value");
                return true;
            }
        };

        match sink.send(frame).await {
            Ok(()) => {
                trace!(id = %self.shared.id, name, value, "Value sent");
                true
            }
            Err(e) => {
                error!(id = %self.shared.id, error = %e, "Failed to send value");
                self.shared.notify_error(&e);
                false
            }
        }
    }

    /// Closes the outbound half, bounded by the close timeout.
    async fn close_sink(&self, sink: &mut FrameSink) {
        match timeout(self.options.close_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(id = %self.shared.id, error = %e, "Close failed"),
            Err(_) => debug!(id = %self.shared.id, "Close timed out"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crate::protocol::{ParameterDescriptor, ValueUpdate};
    use crate::transport::memory::{MemoryConnector, MemoryEvent, MemoryListener};

    #[derive(Default)]
    struct Recorder {
        opened: AtomicUsize,
        closed: AtomicUsize,
        messages: Mutex<Vec<ValueUpdate>>,
        errors: Mutex<Vec<String>>,
    }

    impl ConnectionObserver for Recorder {
        fn on_open(&self, _handshake: &Handshake) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        fn on_message(&self, update: ValueUpdate) {
            self.messages.lock().push(update);
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().push(error.to_string());
        }

        fn on_close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handshake() -> Handshake {
        Handshake::new(
            "controls",
            vec![ParameterDescriptor::new("x").with_range(0.0, 127.0)],
        )
    }

    fn open(options: ConnectionOptions) -> (Connection, MemoryConnector, MemoryListener, Arc<Recorder>) {
        let (connector, listener) = MemoryConnector::new();
        let recorder = Arc::new(Recorder::default());
        let connection = Connection::open(
            Url::parse("ws://memory/widget-7/autoconfig").expect("url"),
            handshake(),
            options,
            Arc::new(connector.clone()),
            recorder.clone(),
        )
        .expect("open");

        (connection, connector, listener, recorder)
    }

    /// Lets spawned tasks run without advancing a paused clock by much.
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_options() {
        let config = TelemetryConfig::new();
        assert_eq!(
            ConnectionOptions::interactive(&config).reconnect_delay,
            Duration::from_millis(1000)
        );
        assert_eq!(
            ConnectionOptions::scope(&config).reconnect_delay,
            Duration::from_millis(5000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_then_open() {
        let (connection, _connector, mut listener, recorder) = open(ConnectionOptions::default());

        let mut peer = listener.accept().await.expect("peer");
        let sent = peer.handshake().await.expect("handshake");
        assert_eq!(sent, handshake());

        settle().await;
        assert!(connection.is_open());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_delivered_in_order() {
        let (_connection, _connector, mut listener, recorder) = open(ConnectionOptions::default());
        let peer = listener.accept().await.expect("peer");

        peer.send_text(r#"{"on":"x","value":1}"#);
        peer.send_update("x", 2.0);
        peer.send_text(r#"{"on":"y","value":3}"#);
        settle().await;

        assert_eq!(
            *recorder.messages.lock(),
            vec![
                ValueUpdate::new("x", 1.0),
                ValueUpdate::new("x", 2.0),
                ValueUpdate::new("y", 3.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_binary_when_open() {
        let (connection, _connector, mut listener, _recorder) = open(ConnectionOptions::default());
        let mut peer = listener.accept().await.expect("peer");
        peer.handshake().await.expect("handshake");
        settle().await;

        assert!(connection.send("x", 64.0));
        let frame = peer.recv().await.expect("frame");
        assert_eq!(frame, Frame::Binary(codec::encode_binary("x", 64.0).expect("encode")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_json_encoding() {
        let options = ConnectionOptions {
            encoding: ControlEncoding::Json,
            ..ConnectionOptions::default()
        };
        let (connection, _connector, mut listener, _recorder) = open(options);
        let mut peer = listener.accept().await.expect("peer");
        peer.handshake().await.expect("handshake");
        settle().await;

        assert!(connection.send("x", 0.5));
        assert_eq!(peer.recv().await, Some(Frame::Text(r#"{"on":"x","value":0.5}"#.into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_before_open_is_dropped() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_refusing(true);
        let connection = Connection::open(
            Url::parse("ws://memory/w/autoconfig").expect("url"),
            handshake(),
            ConnectionOptions::default(),
            Arc::new(connector),
            Arc::new(()),
        )
        .expect("open");

        assert!(!connection.send("x", 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_connection() {
        let (connection, _connector, mut listener, recorder) = open(ConnectionOptions::default());
        let peer = listener.accept().await.expect("peer");

        // Claims a 10-byte name in a 5-byte frame
        peer.send_binary(vec![10u8, b'a', b'b', b'c', b'd']);
        peer.send_update("x", 7.0);
        settle().await;

        assert!(connection.is_open());
        assert_eq!(recorder.errors.lock().len(), 1);
        assert_eq!(*recorder.messages.lock(), vec![ValueUpdate::new("x", 7.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reconnect_after_remote_close() {
        let (connection, connector, mut listener, recorder) = open(ConnectionOptions::default());
        let mut peer = listener.accept().await.expect("peer");
        settle().await;

        peer.close();
        settle().await;
        assert_eq!(connection.state(), ConnectionState::ReconnectScheduled);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(990)).await;
        assert_eq!(connector.attempts(), 1);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.attempts(), 2);
        let _second = listener.try_accept().expect("second peer");

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(connector.attempts(), 2);
        assert!(connection.is_open());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_forces_reconnect() {
        let (_connection, connector, mut listener, recorder) =
            open(ConnectionOptions::default().with_reconnect_delay(Duration::from_millis(50)));
        let peer = listener.accept().await.expect("peer");
        settle().await;

        peer.fail("reset by peer");
        sleep(Duration::from_millis(60)).await;

        assert_eq!(connector.attempts(), 2);
        assert_eq!(recorder.errors.lock().len(), 1);
        assert_eq!(
            connector.log(),
            vec![MemoryEvent::Opened(0), MemoryEvent::Closed(0), MemoryEvent::Opened(1)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connect_retries() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_refusing(true);
        let _connection = Connection::open(
            Url::parse("ws://memory/w/autoconfig").expect("url"),
            handshake(),
            ConnectionOptions::default(),
            Arc::new(connector.clone()),
            Arc::new(()),
        )
        .expect("open");

        sleep(Duration::from_millis(3500)).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_before_handshake_suppresses_open() {
        let (connection, connector, _listener, recorder) = open(ConnectionOptions::default());
        connection.dispose();

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
        assert_eq!(connection.state(), ConnectionState::Disposed);
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_reconnect() {
        let (connection, connector, mut listener, recorder) = open(ConnectionOptions::default());
        let mut peer = listener.accept().await.expect("peer");
        settle().await;

        peer.close();
        settle().await;
        assert_eq!(connection.state(), ConnectionState::ReconnectScheduled);

        connection.dispose();
        connection.dispose();
        sleep(Duration::from_millis(10_000)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
        assert!(!connection.send("x", 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_callbacks_after_dispose() {
        let (connection, _connector, mut listener, recorder) = open(ConnectionOptions::default());
        let peer = listener.accept().await.expect("peer");
        settle().await;

        connection.dispose();
        peer.send_update("x", 1.0);
        peer.send_text(r#"{"on":"x","value":2}"#);
        settle().await;

        assert!(recorder.messages.lock().is_empty());
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_transport() {
        let (connection, connector, mut listener, _recorder) = open(ConnectionOptions::default());
        let mut peer = listener.accept().await.expect("peer");
        settle().await;

        connection.shutdown().await;
        assert_eq!(connector.live(), 0);
        assert_eq!(peer.recv().await.map(|f| matches!(f, Frame::Text(_))), Some(true));
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_then_reopen() {
        let (connection, connector, mut listener, _recorder) = open(ConnectionOptions::default());
        let _peer = listener.accept().await.expect("peer");
        settle().await;

        connection.close();
        sleep(Duration::from_millis(5000)).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connector.attempts(), 1);

        connection.reopen();
        settle().await;
        assert_eq!(connector.attempts(), 2);
        assert!(connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_cancels_reconnect_delay() {
        let (connection, connector, mut listener, _recorder) = open(ConnectionOptions::default());
        let mut peer = listener.accept().await.expect("peer");
        settle().await;

        peer.close();
        settle().await;
        connection.reopen();
        settle().await;

        assert_eq!(connector.attempts(), 2);
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(connector.attempts(), 2);
    }
}
