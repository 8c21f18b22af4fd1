use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),
    #[error("transport already closed")]
    Closed,
    #[error("transport fault: {0}")]
    Fault(String),
}

pub trait Transport: Send + 'static {
    type Reader: MessageReader;
    type Writer: MessageWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

pub trait MessageReader: Send + 'static {
    /// `Ok(None)` means the remote side closed the stream normally.
    fn read_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<Bytes>, TransportError>> + Send;
}

pub trait MessageWriter: Send + 'static {
    fn write_message(
        &mut self,
        message: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the write side. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketReader { stream },
            WebSocketWriter {
                sink,
                closed: false,
            },
        )
    }
}

pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

impl MessageReader for WebSocketReader {
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(Bytes::from(text))),
                Message::Binary(data) => return Ok(Some(data)),
                Message::Close(_) => return Ok(None),
                // axum answers pings on its own.
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
        Ok(None)
    }
}

pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl MessageWriter for WebSocketWriter {
    async fn write_message(&mut self, message: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink.send(to_frame(message)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Err(err) = self.sink.close().await {
            debug!(error = ?err, "websocket close did not complete cleanly");
        }
    }
}

/// UTF-8 payloads go out as text frames, everything else as binary.
fn to_frame(message: Bytes) -> Message {
    match Utf8Bytes::try_from(message.clone()) {
        Ok(text) => Message::Text(text),
        Err(_) => Message::Binary(message),
    }
}

const DEFAULT_MEMORY_CAPACITY: usize = 64;

/// In-memory transport whose far side is driven through a [`RemoteEnd`].
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
    outgoing: mpsc::Sender<Bytes>,
    closes: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, RemoteEnd) {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, RemoteEnd) {
        let (to_peer, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_peer) = mpsc::channel(capacity.max(1));
        let closes = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            incoming,
            outgoing,
            closes: Arc::clone(&closes),
        };
        let remote = RemoteEnd {
            to_peer: Some(to_peer),
            from_peer,
            closes,
        };
        (transport, remote)
    }
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (MemoryReader, MemoryWriter) {
        (
            MemoryReader {
                incoming: self.incoming,
            },
            MemoryWriter {
                outgoing: Some(self.outgoing),
                closes: self.closes,
            },
        )
    }
}

pub struct MemoryReader {
    incoming: mpsc::UnboundedReceiver<Result<Bytes, TransportError>>,
}

impl MessageReader for MemoryReader {
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.incoming.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

pub struct MemoryWriter {
    outgoing: Option<mpsc::Sender<Bytes>>,
    closes: Arc<AtomicUsize>,
}

impl MessageWriter for MemoryWriter {
    async fn write_message(&mut self, message: Bytes) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        outgoing
            .send(message)
            .await
            .map_err(|_| TransportError::Fault("remote end dropped".to_string()))
    }

    async fn close(&mut self) {
        if self.outgoing.take().is_some() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct RemoteEnd {
    to_peer: Option<mpsc::UnboundedSender<Result<Bytes, TransportError>>>,
    from_peer: mpsc::Receiver<Bytes>,
    closes: Arc<AtomicUsize>,
}

impl RemoteEnd {
    pub fn send(&self, message: impl Into<Bytes>) {
        if let Some(to_peer) = &self.to_peer {
            let _ = to_peer.send(Ok(message.into()));
        }
    }

    /// Makes the peer's next read fail.
    pub fn fail(&self, reason: &str) {
        if let Some(to_peer) = &self.to_peer {
            let _ = to_peer.send(Err(TransportError::Fault(reason.to_string())));
        }
    }

    /// Closes the stream from the remote side; the peer reads end-of-stream.
    pub fn hang_up(&mut self) {
        self.to_peer = None;
    }

    /// Refuses further messages from the peer; its next write fails.
    pub fn stop_reading(&mut self) {
        self.from_peer.close();
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_peer.recv().await
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
