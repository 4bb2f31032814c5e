//! In-process transport.
//!
//! [`MemoryConnector`] hands out channel-backed transports and delivers the
//! remote half of each one as a [`MemoryPeer`] through a
//! [`MemoryListener`]. It counts connect attempts and records when each
//! transport is opened and released, which is what connection-lifecycle
//! tests assert on.
//!
//! ```ignore
//! let (connector, mut listener) = MemoryConnector::new();
//! let connection = Connection::open(url, handshake, options, Arc::new(connector), observer)?;
//!
//! let mut peer = listener.accept().await.expect("peer");
//! let handshake = peer.handshake().await.expect("handshake");
//! peer.send_update("data", 1.0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Frame, Handshake, codec};

use super::connector::{Connector, Transport};

// ============================================================================
// MemoryEvent
// ============================================================================

/// Lifecycle record of one memory transport, by connection index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEvent {
    /// Transport `n` was handed to a client.
    Opened(usize),
    /// Client released transport `n`.
    Closed(usize),
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    accepted_tx: mpsc::UnboundedSender<MemoryPeer>,
    log: Mutex<Vec<MemoryEvent>>,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    refusing: AtomicBool,
    stalling_close: AtomicBool,
}

impl Shared {
    fn record(&self, event: MemoryEvent) {
        self.log.lock().push(event);
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector producing in-process transports.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Creates a connector and the listener receiving its peers.
    #[must_use]
    pub fn new() -> (Self, MemoryListener) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            accepted_tx,
            log: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
            stalling_close: AtomicBool::new(false),
        });

        (Self { shared }, MemoryListener { accepted_rx })
    }

    /// Number of `connect` calls, including refused ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Number of transports handed out.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of transports currently held by clients.
    #[must_use]
    pub fn live(&self) -> usize {
        let log = self.shared.log.lock();
        let opened = log.iter().filter(|e| matches!(e, MemoryEvent::Opened(_))).count();
        opened - (log.len() - opened)
    }

    /// Snapshot of the open/close log.
    #[must_use]
    pub fn log(&self) -> Vec<MemoryEvent> {
        self.shared.log.lock().clone()
    }

    /// Makes subsequent connects fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Makes client-side closes hang until the client gives up (or
    /// complete normally again).
    pub fn set_stalling_close(&self, stalling: bool) {
        self.shared.stalling_close.store(stalling, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Transport> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(Error::connection(format!("{url} refused")));
        }

        let index = self.shared.opened.fetch_add(1, Ordering::SeqCst);
        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            index,
            url: url.clone(),
            tx: Some(peer_tx),
            rx: peer_rx,
        };

        self.shared.record(MemoryEvent::Opened(index));
        self.shared
            .accepted_tx
            .send(peer)
            .map_err(|_| Error::connection("memory listener dropped"))?;

        let sink = MemorySink {
            tx: client_tx,
            shared: Arc::clone(&self.shared),
        };
        let stream = MemoryStream {
            index,
            rx: client_rx,
            shared: Arc::clone(&self.shared),
        };

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

// ============================================================================
// MemoryListener
// ============================================================================

/// Receives the remote half of every transport handed out.
pub struct MemoryListener {
    accepted_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Waits for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted_rx.recv().await
    }

    /// Returns the next connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted_rx.try_recv().ok()
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Remote end of one memory transport.
pub struct MemoryPeer {
    index: usize,
    url: Url,
    tx: Option<mpsc::UnboundedSender<Result<Frame>>>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Index of this transport in connect order, starting at 0.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// URL the client connected to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Pushes a raw frame to the client. Returns `false` once closed.
    pub fn send(&self, frame: Frame) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame)).is_ok())
    }

    /// Pushes a JSON text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Pushes a binary frame.
    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.send(Frame::Binary(bytes.into()))
    }

    /// Pushes a binary-encoded value update.
    pub fn send_update(&self, name: &str, value: f64) -> bool {
        codec::encode_binary(name, value).is_ok_and(|bytes| self.send_binary(bytes))
    }

    /// Makes the client's stream yield a transport error.
    pub fn fail(&self, message: &str) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(Err(Error::connection(message))).is_ok())
    }

    /// Closes the remote side; the client's stream ends.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Waits for the next frame from the client. `None` once released.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Returns the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Waits for the first frame and parses it as a handshake.
    pub async fn handshake(&mut self) -> Option<Handshake> {
        match self.recv().await? {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Binary(_) => None,
        }
    }
}

// ============================================================================
// Client Halves
// ============================================================================

struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

impl Sink<Frame> for MemorySink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.shared.stalling_close.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}

struct MemoryStream {
    index: usize,
    rx: mpsc::UnboundedReceiver<Result<Frame>>,
    shared: Arc<Shared>,
}

impl Stream for MemoryStream {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.shared.record(MemoryEvent::Closed(self.index));
    }
}

// ============================================================================
// Tests
// ============================================================================
