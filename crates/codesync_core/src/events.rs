//! Events emitted by the sync engine to the host.
//!
//! These are what an editor binding listens to: redraw on
//! [`SyncEvent::DocumentChanged`], show connectivity on
//! [`SyncEvent::StatusChanged`], surface warnings on the drop events.

use crate::transport::ConnectionStatus;

/// Per-room engine state.
///
/// `Idle -> LocalEditing -> AwaitingAck -> Idle`, with remote edits applied
/// in any live state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// Nothing pending.
    Idle,
    /// Local edits not sent yet (coalescing or held back while disconnected).
    LocalEditing,
    /// Every pending edit is sent; waiting for acknowledgements.
    AwaitingAck,
    /// Session torn down.
    Closed,
}

/// Where a document change came from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangeOrigin {
    /// A local edit.
    Local,
    /// A peer's edit. Full-text updates carry no sender.
    Remote {
        /// Sending peer, when known.
        sender_id: Option<String>,
    },
    /// The buffer was replaced by a peer's snapshot.
    Resync,
}

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Transport connectivity changed.
    StatusChanged {
        /// The new status.
        status: ConnectionStatus,
    },
    /// Engine state changed.
    StateChanged {
        /// The new state.
        state: EngineState,
    },
    /// The buffer changed.
    DocumentChanged {
        /// New revision.
        revision: u64,
        /// Full buffer after the change.
        text: String,
        /// Source of the change.
        origin: ChangeOrigin,
    },
    /// An inbound envelope was rejected (malformed, stale, or not applicable).
    EnvelopeDropped {
        /// Why it was rejected.
        reason: String,
    },
    /// A local edit was never acknowledged and has been abandoned.
    EditDropped {
        /// Origin revision of the abandoned edit.
        origin_revision: u64,
    },
    /// Too many failures; a snapshot was requested from peers.
    ResyncRequested,
    /// The document was replaced by a peer's snapshot.
    Resynced {
        /// Revision adopted from the snapshot.
        revision: u64,
    },
}

/// Receives [`SyncEvent`]s from a session.
///
/// Called outside the session lock, so implementations may call back into
/// the session.
pub trait SyncEventHandler: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: SyncEvent);
}

impl<F> SyncEventHandler for F
where
    F: Fn(SyncEvent) + Send + Sync,
{
    fn on_event(&self, event: SyncEvent) {
        self(event)
    }
}
