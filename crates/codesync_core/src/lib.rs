//! # `codesync_core`
//!
//! Synchronization core for collaborative code editing.
//!
//! Several peers edit one text buffer per room. Each peer applies its own
//! edits immediately, ships them to the others as small envelopes over an
//! event channel, and rebases concurrent remote edits over the edits it has
//! not had acknowledged yet, so every replica ends up with the same text.
//!
//! The pieces, bottom-up:
//! 1. [`Document`] and [`EditOp`]: the buffer, its revision counter, and edits
//! 2. [`ChangeCodec`]: edits to wire frames and back
//! 3. [`SyncEngine`]: rebasing, acknowledgements, resends, resync
//! 4. [`Transport`] and [`CollabSession`]: binding an engine to a channel
//!
//! ```ignore
//! let hub = MemoryHub::new();
//! let alice = CollabSession::open(SyncConfig::new("room-1"), hub.connect())?;
//! let bob = CollabSession::open(SyncConfig::new("room-1"), hub.connect())?;
//! alice.edit(EditOp::insert(0, "fn main() {}"))?;
//! assert_eq!(bob.text(), "fn main() {}");
//! ```

#![warn(missing_docs)]

/// Codec docs
pub mod codec;

/// Config docs
pub mod config;

/// Document model
pub mod document;

pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod memory_transport;
pub mod pending;

/// Wire messages
pub mod protocol;

pub mod rebase;
pub mod session;

/// Transport docs
pub mod transport;

#[cfg(feature = "native-sync")]
pub mod tokio_transport;

pub use codec::ChangeCodec;
pub use config::{ConfigError, PayloadFormat, SyncConfig};
pub use document::{Document, EditOp, Snapshot};
pub use engine::{IncomingEvent, SessionAction, SyncEngine};
pub use error::{Result, SyncError};
pub use events::{ChangeOrigin, EngineState, SyncEvent, SyncEventHandler};
pub use memory_transport::{MemoryHub, MemoryTransport};
pub use protocol::{Message, RemoteEnvelope};
pub use session::CollabSession;
pub use transport::{ConnectionStatus, Transport, TransportError};

#[cfg(feature = "native-sync")]
pub use tokio_transport::TokioTransport;
