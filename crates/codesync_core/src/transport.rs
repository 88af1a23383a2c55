//! Transport abstraction for the event channel between peers.
//!
//! The sync core never opens sockets. A host hands a [`Transport`] to
//! [`CollabSession`](crate::CollabSession), which registers its callbacks at
//! construction and removes them on teardown:
//!
//! ```text
//! ┌────────────────────┐  ┌────────────────────┐  ┌────────────────────┐
//! │ TokioTransport     │  │ MemoryTransport    │  │ host transport     │
//! │ (tokio-tungstenite)│  │ (in-process relay) │  │ (socket.io, ...)   │
//! └─────────┬──────────┘  └─────────┬──────────┘  └─────────┬──────────┘
//!           └───────────────────────┼───────────────────────┘
//!                                   ▼
//!                       ┌──────────────────────┐
//!                       │   CollabSession      │  send / on_receive /
//!                       │   └── SyncEngine     │  on_status
//!                       └──────────────────────┘
//! ```
//!
//! Transports own connection setup, retries, and reconnection. They report
//! connectivity through the status callback; while disconnected the engine
//! holds its edits back and flushes them on the next `Connected`.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

/// Connectivity reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Frames can be sent and received.
    Connected,
    /// The channel is down; sends fail until reconnected.
    Disconnected,
}

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// A frame could not be handed to the connection.
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Callback invoked with each inbound text frame.
pub type ReceiveCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked when connectivity changes.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Bidirectional event channel used by a session.
///
/// Frames are JSON text produced by [`ChangeCodec`](crate::ChangeCodec); the
/// event name travels inside the frame.
///
/// # Thread Safety
///
/// Callbacks may be invoked from any thread, including synchronously from
/// inside [`Transport::send`].
pub trait Transport: Send + Sync {
    /// Hand a frame to the channel. Fire-and-forget: success means the frame
    /// was accepted, not that any peer received it.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is down or rejects the frame.
    fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Set the callback for inbound frames, replacing any previous one.
    fn set_on_receive(&self, callback: ReceiveCallback);

    /// Set the callback for connectivity changes, replacing any previous one.
    fn set_on_status(&self, callback: StatusCallback);

    /// Unregister every callback.
    fn clear_callbacks(&self);

    /// Check if currently connected.
    fn is_connected(&self) -> bool;
}

/// Callback storage shared by the bundled transports.
#[derive(Default)]
pub(crate) struct CallbackSlots {
    on_receive: RwLock<Option<ReceiveCallback>>,
    on_status: RwLock<Option<StatusCallback>>,
}

impl CallbackSlots {
    pub(crate) fn set_receive(&self, callback: ReceiveCallback) {
        *self.on_receive.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub(crate) fn set_status(&self, callback: StatusCallback) {
        *self.on_status.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub(crate) fn clear(&self) {
        *self.on_receive.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.on_status.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Clone of the receive callback, so it can be invoked without holding the lock.
    pub(crate) fn receiver(&self) -> Option<ReceiveCallback> {
        self.on_receive
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn deliver(&self, frame: &str) {
        match self.receiver() {
            Some(callback) => callback(frame),
            None => log::trace!("[Transport] no receiver registered, dropping frame"),
        }
    }

    pub(crate) fn notify(&self, status: ConnectionStatus) {
        let callback = self
            .on_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_callback_slots_deliver_and_clear() {
        let slots = CallbackSlots::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        slots.set_receive(Arc::new(move |frame: &str| {
            sink.lock().unwrap().push(frame.to_string());
        }));
        let sink = Arc::clone(&seen);
        slots.set_status(Arc::new(move |status: ConnectionStatus| {
            sink.lock().unwrap().push(format!("{status:?}"));
        }));

        slots.deliver("one");
        slots.notify(ConnectionStatus::Disconnected);
        slots.clear();
        slots.deliver("two");
        slots.notify(ConnectionStatus::Connected);

        assert_eq!(*seen.lock().unwrap(), vec!["one", "Disconnected"]);
    }

    #[test]
    fn test_connection_status_serializes_tagged() {
        let json = serde_json::to_string(&ConnectionStatus::Connected).unwrap();
        assert_eq!(json, r#"{"type":"connected"}"#);
    }
}
