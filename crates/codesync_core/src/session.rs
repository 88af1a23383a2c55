//! Transport-bound session for one room.
//!
//! [`CollabSession`] wires a [`SyncEngine`] to a [`Transport`]: it registers
//! the transport callbacks when opened, feeds them into the engine, and
//! executes the engine's actions after releasing its lock (transports may
//! deliver frames synchronously from inside `send`). Closing or dropping the
//! session unregisters the callbacks and discards pending edits; nothing
//! received afterwards is applied.
//!
//! The host drives timing by calling [`CollabSession::tick`] periodically
//! (every few tens of milliseconds is plenty).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::SyncConfig;
use crate::document::{EditOp, Snapshot};
use crate::engine::{IncomingEvent, SessionAction, SyncEngine};
use crate::error::{Result, SyncError};
use crate::events::{EngineState, SyncEventHandler};
use crate::transport::{ConnectionStatus, Transport};

struct Shared {
    engine: Mutex<SyncEngine>,
    transport: Arc<dyn Transport>,
    handler: Option<Arc<dyn SyncEventHandler>>,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, event: IncomingEvent) {
        if self.closed.load(Ordering::SeqCst) {
            log::trace!("[CollabSession] closed, dropping {:?}", event);
            return;
        }
        let actions = self.lock().process(event, Instant::now());
        self.execute(actions);
    }

    fn execute(&self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send(frame) => {
                    if let Err(e) = self.transport.send(&frame) {
                        log::warn!("[CollabSession] send failed: {e}");
                    }
                }
                SessionAction::Emit(event) => {
                    if let Some(handler) = &self.handler {
                        handler.on_event(event);
                    }
                }
            }
        }
    }
}

/// A collaborative editing session bound to a transport.
pub struct CollabSession {
    shared: Arc<Shared>,
}

impl CollabSession {
    /// Open a session with an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the config is invalid.
    pub fn open(config: SyncConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::open_with(config, Snapshot::default(), transport, None)
    }

    /// Open a session starting from `initial`, reporting events to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the config is invalid.
    pub fn open_with(
        config: SyncConfig,
        initial: Snapshot,
        transport: Arc<dyn Transport>,
        handler: Option<Arc<dyn SyncEventHandler>>,
    ) -> Result<Self> {
        config.validate()?;
        log::info!(
            "[CollabSession] opening room {} as {}",
            config.room_id,
            config.sender_id
        );

        let shared = Arc::new(Shared {
            engine: Mutex::new(SyncEngine::with_snapshot(config, initial)),
            transport: Arc::clone(&transport),
            handler,
            closed: AtomicBool::new(false),
        });

        // Weak: the transport must not keep a torn-down session alive.
        let weak = Arc::downgrade(&shared);
        transport.set_on_receive(Arc::new(move |frame: &str| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(IncomingEvent::Frame(frame.to_string()));
            }
        }));
        let weak = Arc::downgrade(&shared);
        transport.set_on_status(Arc::new(move |status: ConnectionStatus| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(match status {
                    ConnectionStatus::Connected => IncomingEvent::Connected,
                    ConnectionStatus::Disconnected => IncomingEvent::Disconnected,
                });
            }
        }));

        if transport.is_connected() {
            shared.dispatch(IncomingEvent::Connected);
        }
        Ok(Self { shared })
    }

    /// Apply a local edit and return the new revision.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfBounds`] if the edit does not fit the buffer
    /// and [`SyncError::SessionClosed`] after [`CollabSession::close`].
    pub fn edit(&self, op: EditOp) -> Result<u64> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        let (actions, revision) = {
            let mut engine = self.shared.lock();
            let actions = engine.local_edit(op, Instant::now())?;
            (actions, engine.document().revision())
        };
        self.shared.execute(actions);
        Ok(revision)
    }

    /// Replace the buffer with `text` as a single minimal local edit, for
    /// editor bindings that only report whole contents.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] after [`CollabSession::close`].
    pub fn set_text(&self, text: &str) -> Result<u64> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        let (actions, revision) = {
            let mut engine = self.shared.lock();
            let Some(op) = EditOp::diff(engine.document().text(), text) else {
                return Ok(engine.document().revision());
            };
            let actions = engine.local_edit(op, Instant::now())?;
            (actions, engine.document().revision())
        };
        self.shared.execute(actions);
        Ok(revision)
    }

    /// Flush coalesced edits and resend unacknowledged ones that timed out.
    pub fn tick(&self) {
        self.shared.dispatch(IncomingEvent::Tick);
    }

    /// Ask peers for a full snapshot, replacing local state when it arrives.
    pub fn request_resync(&self) {
        if self.is_closed() {
            return;
        }
        let actions = self.shared.lock().request_resync();
        self.shared.execute(actions);
    }

    /// Current buffer and revision.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().snapshot()
    }

    /// Current buffer.
    pub fn text(&self) -> String {
        self.shared.lock().document().text().to_string()
    }

    /// Engine state.
    pub fn state(&self) -> EngineState {
        self.shared.lock().state()
    }

    /// Number of unacknowledged local edits.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending().len()
    }

    /// Returns true once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Tear the session down. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.lock().close();
        self.shared.transport.clear_callbacks();
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        self.close();
    }
}
