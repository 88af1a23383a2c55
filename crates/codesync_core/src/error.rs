//! Error types for the sync core.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors produced by the document model, codec, and sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An edit addressed characters past the end of the buffer.
    ///
    /// Indicates a local bug or a desynchronized editing surface. Surfaced to
    /// the caller, never silently corrected.
    #[error("edit at {position} (length {length}) is out of bounds for buffer of {buffer_len} chars")]
    OutOfBounds {
        /// Start position of the rejected edit.
        position: usize,
        /// Number of characters the edit would remove.
        length: usize,
        /// Current buffer length in characters.
        buffer_len: usize,
    },

    /// Inbound wire data could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// An envelope was already applied (duplicate or replay).
    #[error("stale revision {revision} from {sender_id} (already applied up to {last_applied})")]
    StaleRevision {
        /// Peer that sent the envelope.
        sender_id: String,
        /// Origin revision carried by the envelope.
        revision: u64,
        /// Origin revision of the last envelope applied from that peer.
        last_applied: u64,
    },

    /// An envelope arrived before an earlier one from the same peer.
    ///
    /// The earlier envelope was lost or is still on its way; the later one is
    /// not applied or acknowledged, so the sender resends both.
    #[error(
        "missing envelope from {sender_id}: edit {revision} follows {prev_origin:?}, last applied {last_applied:?}"
    )]
    MissingEnvelope {
        /// Peer that sent the envelope.
        sender_id: String,
        /// Origin revision carried by the envelope.
        revision: u64,
        /// Previous envelope the sender linked to.
        prev_origin: Option<u64>,
        /// Origin revision of the last envelope applied from that peer.
        last_applied: Option<u64>,
    },

    /// An outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The transport refused an outbound message.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The session was torn down.
    #[error("session closed")]
    SessionClosed,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
