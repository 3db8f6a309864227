//! Loopback connector for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate the chat
//! socket. Created via [`LoopbackConnector::create`], which returns the
//! client-side connector and a [`LoopbackServer`] that accepts each opened
//! connection as a [`LoopbackPeer`]. Tests drive the server side through the
//! peer: push frames, read what the client sent, or drop it to simulate a
//! lost connection. Connection attempts can be made to fail on demand.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, Frame, FrameReader, FrameWriter, TransportError, TransportType};

#[derive(Default)]
struct Control {
    refusing: bool,
    fail_next: usize,
    open_delay: Option<Duration>,
    attempts: Vec<Url>,
}

/// Client side of the loopback socket.
///
/// Cloning yields another handle to the same connector, so a test can keep
/// one for failure injection after handing the other to the engine.
#[derive(Clone)]
pub struct LoopbackConnector {
    control: Arc<Mutex<Control>>,
    accept_tx: mpsc::UnboundedSender<LoopbackPeer>,
    buffer: usize,
}

/// Server side: yields one [`LoopbackPeer`] per successful connection.
pub struct LoopbackServer {
    accept_rx: mpsc::UnboundedReceiver<LoopbackPeer>,
}

/// Server end of one loopback connection.
pub struct LoopbackPeer {
    url: Url,
    to_client: mpsc::Sender<Frame>,
    from_client: mpsc::Receiver<String>,
}

impl LoopbackConnector {
    /// Create a connector and the server that accepts its connections.
    ///
    /// The `buffer` parameter controls the channel capacity for each
    /// direction of every connection.
    #[must_use]
    pub fn create(buffer: usize) -> (Self, LoopbackServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                control: Arc::new(Mutex::new(Control::default())),
                accept_tx,
                buffer,
            },
            LoopbackServer { accept_rx },
        )
    }

    /// Refuse every connection attempt while `true`.
    pub fn set_refusing(&self, refusing: bool) {
        self.control.lock().refusing = refusing;
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.control.lock().fail_next = count;
    }

    /// Delay every handshake by `delay`.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.control.lock().open_delay = delay;
    }

    /// URLs of every connection attempt so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> Vec<Url> {
        self.control.lock().attempts.clone()
    }
}

impl Connector for LoopbackConnector {
    type Writer = LoopbackWriter;
    type Reader = LoopbackReader;

    async fn open(&self, url: &Url) -> Result<(LoopbackWriter, LoopbackReader), TransportError> {
        let delay = {
            let mut control = self.control.lock();
            control.attempts.push(url.clone());
            control.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut control = self.control.lock();
            if control.refusing {
                return Err(TransportError::Unreachable(url.to_string()));
            }
            if control.fail_next > 0 {
                control.fail_next -= 1;
                return Err(TransportError::Unreachable(url.to_string()));
            }
        }

        let (to_client, client_rx) = mpsc::channel(self.buffer);
        let (client_tx, from_client) = mpsc::channel(self.buffer);
        let peer = LoopbackPeer {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Unreachable(url.to_string()))?;

        Ok((
            LoopbackWriter { tx: Some(client_tx) },
            LoopbackReader { rx: client_rx },
        ))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Loopback
    }
}

impl LoopbackServer {
    /// Waits for the next connection the client opens.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accept_rx.recv().await
    }
}

impl LoopbackPeer {
    /// URL the client connected to.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Pushes a text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client has gone.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(Frame::Text(text.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Sends a close frame and drops the connection.
    pub async fn close(self, reason: Option<String>) {
        let _ = self.to_client.send(Frame::Close(reason)).await;
    }

    /// Waits for the next text frame the client sent.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }
}

/// Client write half of a loopback connection.
pub struct LoopbackWriter {
    tx: Option<mpsc::Sender<String>>,
}

impl FrameWriter for LoopbackWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

/// Client read half of a loopback connection.
pub struct LoopbackReader {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReader for LoopbackReader {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("ws://loopback/ws/chat?session=s").unwrap()
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut server) = LoopbackConnector::create(8);
        let (mut writer, mut reader) = connector.open(&url()).await.unwrap();
        let mut peer = server.accept().await.unwrap();

        writer.send_text("up".into()).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("up"));

        peer.send_text("down").await.unwrap();
        assert_eq!(
            reader.next_frame().await.unwrap().unwrap(),
            Frame::Text("down".into())
        );
    }

    #[tokio::test]
    async fn dropped_peer_ends_the_stream() {
        let (connector, mut server) = LoopbackConnector::create(8);
        let (_writer, mut reader) = connector.open(&url()).await.unwrap();
        drop(server.accept().await.unwrap());
        assert!(reader.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn close_delivers_close_frame() {
        let (connector, mut server) = LoopbackConnector::create(8);
        let (_writer, mut reader) = connector.open(&url()).await.unwrap();
        let peer = server.accept().await.unwrap();
        peer.close(Some("bye".into())).await;
        assert_eq!(
            reader.next_frame().await.unwrap().unwrap(),
            Frame::Close(Some("bye".into()))
        );
    }

    #[tokio::test]
    async fn fail_next_refuses_then_recovers() {
        let (connector, _server) = LoopbackConnector::create(8);
        connector.fail_next(2);
        assert!(connector.open(&url()).await.is_err());
        assert!(connector.open(&url()).await.is_err());
        assert!(connector.open(&url()).await.is_ok());
        assert_eq!(connector.attempts().len(), 3);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (connector, _server) = LoopbackConnector::create(8);
        let (mut writer, _reader) = connector.open(&url()).await.unwrap();
        writer.close().await;
        assert!(matches!(
            writer.send_text("x".into()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
