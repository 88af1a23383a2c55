//! Tokio-tungstenite WebSocket transport implementation.
//!
//! Wraps `tokio_tungstenite::connect_async()` and implements [`Transport`].
//! One task writes queued frames to the socket, another reads frames and
//! invokes the receive callback. The connection is not re-established: when
//! the socket closes the status callback reports `Disconnected` and the host
//! decides whether to connect a new transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::transport::{
    CallbackSlots, ConnectionStatus, ReceiveCallback, StatusCallback, Transport, TransportError,
};

/// A [`Transport`] backed by tokio-tungstenite.
pub struct TokioTransport {
    outgoing: mpsc::UnboundedSender<String>,
    callbacks: Arc<CallbackSlots>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TokioTransport {
    /// Build the URL for `room_id` on a relay server (`?room=<id>`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if `server_url` does not parse.
    pub fn room_url(server_url: &str, room_id: &str) -> Result<String, TransportError> {
        let mut url = Url::parse(server_url).map_err(|e| {
            TransportError::ConnectionFailed(format!("invalid server url {server_url}: {e}"))
        })?;
        url.query_pairs_mut().append_pair("room", room_id);
        Ok(url.into())
    }

    /// Connect to a WebSocket URL. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        log::info!("[TokioTransport] connected to {url}");

        let (mut sink, mut stream) = ws.split();
        let (outgoing, mut queued) = mpsc::unbounded_channel::<String>();
        let callbacks = Arc::new(CallbackSlots::default());
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(frame) = queued.recv().await {
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    log::warn!("[TokioTransport] send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let callbacks = Arc::clone(&callbacks);
            let connected = Arc::clone(&connected);
            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => callbacks.deliver(&text),
                        Ok(Message::Close(_)) => break,
                        // Binary frames are not part of the protocol; pings are
                        // answered by tungstenite.
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("[TokioTransport] receive failed: {e}");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                log::info!("[TokioTransport] connection closed");
                callbacks.notify(ConnectionStatus::Disconnected);
            })
        };

        Ok(Self {
            outgoing,
            callbacks,
            connected,
            reader,
            writer,
        })
    }

    /// Close the connection. Queued frames that were not written are lost.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
    }
}

impl Transport for TokioTransport {
    fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outgoing
            .send(frame.to_string())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn set_on_receive(&self, callback: ReceiveCallback) {
        self.callbacks.set_receive(callback);
    }

    fn set_on_status(&self, callback: StatusCallback) {
        self.callbacks.set_status(callback);
    }

    fn clear_callbacks(&self) {
        self.callbacks.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TokioTransport {
    fn drop(&mut self) {
        self.close();
    }
}
