//! Transport sockets: one WebSocket plus its read and write pumps.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mintdrip_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::error::ConnectionError;
use crate::pumps::{read::read_pump, write::write_pump};
use crate::types::CloseReason;

/// Outbound half of an opened WebSocket.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of an opened WebSocket.
pub type WsSource = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// A freshly opened WebSocket, not yet driven by any task.
pub struct RawSocket {
    pub sink: WsSink,
    pub source: WsSource,
}

/// Opens WebSockets. Swappable so tests can run against in-memory nodes.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<RawSocket, ConnectionError>>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<RawSocket, ConnectionError>> {
        let url = url.to_owned();
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false)
                    .await?;
            let (sink, source) = ws_stream.split();
            Ok(RawSocket {
                sink: Box::pin(sink),
                source: Box::pin(source),
            })
        })
    }
}

/// One live WebSocket. Never reused: a reconnect builds a new one.
pub struct TransportSocket {
    url: String,
    write_tx: mpsc::Sender<Message>,
    pongs: watch::Receiver<Instant>,
    closed: watch::Receiver<Option<CloseReason>>,
    cancel: CancellationToken,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl TransportSocket {
    /// Starts the pumps for `raw`. Returns the socket and the ordered
    /// stream of inbound text frames.
    pub fn from_raw(url: impl Into<String>, raw: RawSocket) -> (Self, mpsc::Receiver<String>) {
        let url = url.into();
        let (write_tx, write_rx) = mpsc::channel::<Message>(256);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(1024);
        let (pong_tx, pong_rx) = watch::channel(Instant::now());
        let (closed_tx, closed_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(write_pump(raw.sink, write_rx, cancel))
        };

        let read_handle = {
            let cancel = cancel.clone();
            let write_tx = write_tx.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let reason =
                    read_pump(raw.source, inbound_tx, pong_tx, write_tx, cancel.clone()).await;
                debug!(url = %url, %reason, "socket closed");
                cancel.cancel();
                closed_tx.send_replace(Some(reason));
            })
        };

        let socket = Self {
            url,
            write_tx,
            pongs: pong_rx,
            closed: closed_rx,
            cancel,
            read_handle,
            write_handle,
        };
        (socket, inbound_rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queues a text frame.
    pub async fn send_text(&self, text: String) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.write_tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Queues a WebSocket ping.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        self.write_tx
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Receiver stamped with the arrival time of every pong.
    pub fn pongs(&self) -> watch::Receiver<Instant> {
        self.pongs.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && self.closed.borrow().is_none()
    }

    /// Graceful close: the write pump flushes a close frame on its way out.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Forced close: no close frame, pumps stop immediately.
    pub fn terminate(&self) {
        self.write_handle.abort();
        self.cancel.cancel();
    }

    /// Resolves once the socket has stopped.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.closed.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Terminated),
            Err(_) => CloseReason::Terminated,
        }
    }
}

impl Drop for TransportSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
    }
}
