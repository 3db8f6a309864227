//! Transport layer abstraction for the chat socket.
//!
//! Defines the [`Connector`] trait that opens one full-duplex text-frame
//! stream, split into a [`FrameWriter`] and a [`FrameReader`] half.
//! Concrete implementations include:
//! - [`websocket::WsConnector`] -- WebSocket client over `tokio-tungstenite`
//! - [`loopback::LoopbackConnector`] -- in-process channel-based connector for testing

pub mod loopback;
pub mod websocket;

use std::fmt;
use std::future::Future;

use url::Url;

/// A frame received from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame carrying one JSON event.
    Text(String),
    /// The remote end closed the connection, with an optional reason.
    Close(Option<String>),
}

/// Describes which kind of connector is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// WebSocket over TCP (optionally TLS).
    WebSocket,
    /// In-process loopback for testing.
    Loopback,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "WebSocket"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("{0} is unreachable")]
    Unreachable(String),

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens chat socket connections.
pub trait Connector: Send + Sync + 'static {
    /// Sending half of an open connection.
    type Writer: FrameWriter;
    /// Receiving half of an open connection.
    type Reader: FrameReader;

    /// Opens a connection to `url`, resolving once the handshake completes.
    fn open(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<(Self::Writer, Self::Reader), TransportError>> + Send;

    /// Return the type of this connector.
    fn transport_type(&self) -> TransportType;
}

/// Sending half of a connection.
pub trait FrameWriter: Send + 'static {
    /// Sends one text frame.
    fn send_text(
        &mut self,
        text: String,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Initiates a graceful close. Errors are ignored: the connection is
    /// being abandoned either way.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Receiving half of a connection.
pub trait FrameReader: Send + 'static {
    /// Waits for the next frame.
    ///
    /// Returns `None` once the stream has ended.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Frame, TransportError>>> + Send;
}
