//! WebSocket implementation of [`Connector`].
//!
//! Opens the chat socket with `tokio-tungstenite` and splits it into a
//! [`WsWriter`] (sink half) and a [`WsReader`] (stream half). Text frames
//! surface as [`Frame::Text`]; binary frames are decoded as lossy UTF-8 so
//! that the codec can reject them as malformed; control frames other than
//! close are answered by the library and never surface.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, Frame, FrameReader, FrameWriter, TransportError, TransportType};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket connections with a handshake timeout.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector with the given handshake timeout.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WsConnector {
    type Writer = WsWriter;
    type Reader = WsReader;

    /// Performs the WebSocket handshake against `url`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake does not finish in time.
    /// - [`TransportError::Unreachable`] if the server refuses the connection.
    /// - [`TransportError::Io`] for HTTP upgrade rejections and other failures.
    async fn open(&self, url: &Url) -> Result<(WsWriter, WsReader), TransportError> {
        let host = url.host_str().unwrap_or("<none>").to_string();
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                tracing::warn!(host = %host, "chat socket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(host = %host, err = %e, "chat socket connect failed");
                map_ws_connect_error(e, &host)
            })?;

        let (sink, stream) = stream.split();
        tracing::debug!(host = %host, "chat socket open");
        Ok((WsWriter { sink }, WsReader { stream }))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::WebSocket
    }
}

/// Write half of a chat socket.
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

impl FrameWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink.send(Message::text(text)).await.map_err(|e| {
            tracing::warn!(err = %e, "chat socket send failed");
            TransportError::ConnectionClosed
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!(err = %e, "chat socket close failed");
        }
    }
}

/// Read half of a chat socket.
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(err = %e, "chat socket read error");
                    return Some(Err(TransportError::Protocol(e.to_string())));
                }
            };
            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Binary(data) => {
                    return Some(Ok(Frame::Text(String::from_utf8_lossy(&data).into_owned())));
                }
                Message::Close(frame) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    return Some(Ok(Frame::Close(reason)));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

/// Map a tungstenite connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error, host: &str) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(host.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "chat socket upgrade rejected: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "chat socket connection error: {other}"
        ))),
    }
}
