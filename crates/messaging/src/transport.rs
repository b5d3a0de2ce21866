use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport read failed: {0}")]
    Receive(String),
}

/// What the socket reader observes, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    Error(String),
    Closed,
}

/// An open socket: text frames go out through `outbound`, everything observed comes
/// back through `inbound`. Dropping `outbound` closes the socket.
#[derive(Debug)]
pub struct SocketLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<SocketLink, TransportError>;
}

/// Web socket transport over tokio-tungstenite with rustls.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<SocketLink, TransportError> {
        let (stream, _response) =
            connect_async(url).await.map_err(|error| TransportError::Connect(error.to_string()))?;
        info!(event_name = "messaging.socket.opened", url, "web messaging socket opened");

        let (outbound, write_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, inbound) = mpsc::unbounded_channel::<LinkEvent>();
        tokio::spawn(pump(stream, write_rx, event_tx));

        Ok(SocketLink { outbound, inbound })
    }
}

async fn pump<S>(
    stream: S,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut sink, mut reader) = stream.split();

    loop {
        tokio::select! {
            incoming = reader.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(LinkEvent::Frame(text.to_string())).is_err() {
                            debug!("socket event receiver dropped; closing");
                            let _ = sink.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(error) = sink.send(Message::Pong(data)).await {
                            let _ = event_tx.send(LinkEvent::Error(error.to_string()));
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("web messaging socket closed by platform");
                        let _ = event_tx.send(LinkEvent::Closed);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        warn!(error = %error, "web messaging socket read failed");
                        let _ = event_tx.send(LinkEvent::Error(error.to_string()));
                        return;
                    }
                }
            }
            outgoing = write_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if let Err(error) = sink.send(Message::Text(text.into())).await {
                            warn!(error = %error, "web messaging socket write failed");
                            let _ = event_tx.send(LinkEvent::Error(error.to_string()));
                            return;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        debug!("web messaging socket closed by client");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryPeer, MemoryTransport};

#[cfg(any(test, feature = "testing"))]
mod memory {
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::{LinkEvent, SocketLink, SocketTransport, TransportError};

    /// In-process transport. Each `open` hands the far end to the test through the
    /// receiver returned by [`MemoryTransport::new`].
    pub struct MemoryTransport {
        peers: Option<mpsc::UnboundedSender<MemoryPeer>>,
        refusal: Option<String>,
    }

    /// The platform side of a [`MemoryTransport`] link.
    #[derive(Debug)]
    pub struct MemoryPeer {
        pub url: String,
        pub sent: mpsc::UnboundedReceiver<String>,
        pub inbound: mpsc::UnboundedSender<LinkEvent>,
    }

    impl MemoryTransport {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
            let (peers, peer_rx) = mpsc::unbounded_channel();
            (Self { peers: Some(peers), refusal: None }, peer_rx)
        }

        /// A transport whose every `open` fails with `reason`.
        pub fn refusing(reason: impl Into<String>) -> Self {
            Self { peers: None, refusal: Some(reason.into()) }
        }
    }

    #[async_trait]
    impl SocketTransport for MemoryTransport {
        async fn open(&self, url: &str) -> Result<SocketLink, TransportError> {
            if let Some(reason) = &self.refusal {
                return Err(TransportError::Connect(reason.clone()));
            }
            let peers = self
                .peers
                .as_ref()
                .ok_or_else(|| TransportError::Connect("memory transport has no peer".to_owned()))?;

            let (outbound, sent) = mpsc::unbounded_channel();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            peers
                .send(MemoryPeer { url: url.to_owned(), sent, inbound: inbound_tx })
                .map_err(|_| TransportError::Connect("memory peer receiver dropped".to_owned()))?;

            Ok(SocketLink { outbound, inbound })
        }
    }

    impl MemoryPeer {
        /// Next frame the client wrote, parsed as JSON. `None` once the client closed.
        pub async fn next_sent(&mut self) -> Option<Value> {
            let text = self.sent.recv().await?;
            serde_json::from_str(&text).ok()
        }

        /// Frames written but not yet read, without waiting.
        pub fn drain_sent(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(text) = self.sent.try_recv() {
                if let Ok(value) = serde_json::from_str(&text) {
                    frames.push(value);
                }
            }
            frames
        }

        pub fn push(&self, frame: Value) {
            let _ = self.inbound.send(LinkEvent::Frame(frame.to_string()));
        }

        pub fn fail(&self, error: impl Into<String>) {
            let _ = self.inbound.send(LinkEvent::Error(error.into()));
        }

        pub fn close(&self) {
            let _ = self.inbound.send(LinkEvent::Closed);
        }
    }
}
