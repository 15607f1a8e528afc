//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves for accepted server connections. The connection
//! pumps only ever see [`WsWriter`], [`WsReader`] and [`WsMessage`].
//!
//! Writes are split into `feed_*` (queue in the sink) and [`WsWriter::flush`]
//! so the outbound pump can coalesce several frames into one flush.

// Rust guideline compliant 2026-02

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite, WebSocketStream};

/// Concrete WebSocket stream type for accepted connections.
pub type WsStream = WebSocketStream<TcpStream>;

/// Transport failure reported by either half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Reading from the peer failed.
    Read(String),
    /// Writing to the peer failed.
    Write(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read(msg) => write!(f, "WebSocket read error: {msg}"),
            Self::Write(msg) => write!(f, "WebSocket write error: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}

/// Received WebSocket message.
#[derive(Debug, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload (tungstenite answers it automatically).
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Split an upgraded stream into writer and reader halves.
pub fn split(stream: WsStream) -> (WsWriter, WsReader) {
    let (sink, stream) = stream.split();
    (WsWriter { sink }, WsReader { stream })
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Queue a UTF-8 text frame without flushing.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Write`] if the sink is closed.
    pub async fn feed_text(&mut self, text: String) -> Result<(), WireError> {
        self.sink
            .feed(tungstenite::Message::Text(text))
            .await
            .map_err(|e| WireError::Write(e.to_string()))
    }

    /// Flush every queued frame to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Write`] on an I/O error.
    pub async fn flush(&mut self) -> Result<(), WireError> {
        self.sink
            .flush()
            .await
            .map_err(|e| WireError::Write(e.to_string()))
    }

    /// Send a keepalive ping.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Write`] if the send fails.
    pub async fn send_ping(&mut self) -> Result<(), WireError> {
        self.sink
            .send(tungstenite::Message::Ping(Vec::new()))
            .await
            .map_err(|e| WireError::Write(e.to_string()))
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Write`] if the send fails.
    pub async fn send_close(&mut self) -> Result<(), WireError> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .map_err(|e| WireError::Write(e.to_string()))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, WireError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data)));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data)));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data)));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Err(e)) => return Some(Err(WireError::Read(e.to_string()))),
                None => return None,
            }
        }
    }
}
