//! Transport construction.
//!
//! A [`Connector`] turns a URL into a duplex [`Transport`]: a sink of
//! outbound [`Frame`]s and a stream of inbound ones. [`WsConnector`] is the
//! tokio-tungstenite implementation; tests use
//! [`MemoryConnector`](super::memory::MemoryConnector).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Frame;

// ============================================================================
// Types
// ============================================================================

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// Inbound half of a transport. Ends when the remote closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

// ============================================================================
// Transport
// ============================================================================

/// One live duplex channel to a remote endpoint.
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl Transport {
    /// Creates a transport from its two halves.
    #[inline]
    #[must_use]
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens transports. Called once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connects to `url`.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the endpoint cannot be reached.
    async fn connect(&self, url: &Url) -> Result<Transport>;
}

// ============================================================================
// WsConnector
// ============================================================================

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Transport> {
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

        debug!(%url, "WebSocket connected");

        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .sink_map_err(Error::from)
            .with(|frame: Frame| future::ready(Ok::<_, Error>(Message::from(frame))));

        // Close ends the stream; Ping, Pong and raw frames are skipped
        let stream = ws_read
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                    Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                })
            });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
