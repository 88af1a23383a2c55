//! In-process relay transport.
//!
//! [`MemoryHub`] plays the part of the relay server: every frame a connected
//! [`MemoryTransport`] sends is delivered to the other connected transports
//! in send order, and optionally echoed back to the sender. Delivery is
//! synchronous by default; [`MemoryHub::set_buffered`] holds frames in a
//! queue until [`MemoryHub::flush`] so tests can stage concurrent edits.
//!
//! Used for tests and for hosts that run several editors in one process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::transport::{
    CallbackSlots, ConnectionStatus, ReceiveCallback, StatusCallback, Transport, TransportError,
};

#[derive(Default)]
struct RelayState {
    peers: Vec<Weak<MemoryTransport>>,
    next_id: usize,
    echo: bool,
    buffered: bool,
    queue: VecDeque<(usize, String)>,
}

#[derive(Default)]
struct Relay {
    state: Mutex<RelayState>,
}

impl Relay {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, from: usize, frame: String) {
        {
            let mut state = self.lock();
            if state.buffered {
                state.queue.push_back((from, frame));
                return;
            }
        }
        self.deliver(from, &frame);
    }

    /// Invoke receivers outside the lock: they may send in turn.
    fn deliver(&self, from: usize, frame: &str) {
        let targets: Vec<Arc<MemoryTransport>> = {
            let mut state = self.lock();
            state.peers.retain(|peer| peer.strong_count() > 0);
            let echo = state.echo;
            state
                .peers
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|peer| peer.is_connected() && (echo || peer.id != from))
                .collect()
        };
        for target in targets {
            target.callbacks.deliver(frame);
        }
    }
}

/// In-process relay connecting [`MemoryTransport`]s.
#[derive(Clone, Default)]
pub struct MemoryHub {
    relay: Arc<Relay>,
}

impl MemoryHub {
    /// Create a hub that delivers immediately and does not echo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo every frame back to its sender too, like relays that broadcast
    /// to the whole room.
    pub fn with_echo(self, echo: bool) -> Self {
        self.relay.lock().echo = echo;
        self
    }

    /// Attach a new, connected transport.
    pub fn connect(&self) -> Arc<MemoryTransport> {
        let mut state = self.relay.lock();
        let id = state.next_id;
        state.next_id += 1;
        let transport = Arc::new(MemoryTransport {
            id,
            relay: Arc::clone(&self.relay),
            callbacks: CallbackSlots::default(),
            connected: AtomicBool::new(true),
        });
        state.peers.push(Arc::downgrade(&transport));
        transport
    }

    /// Queue frames instead of delivering them. Turning buffering off does
    /// not deliver what is queued; call [`MemoryHub::flush`].
    pub fn set_buffered(&self, buffered: bool) {
        self.relay.lock().buffered = buffered;
    }

    /// Number of queued frames.
    pub fn queued(&self) -> usize {
        self.relay.lock().queue.len()
    }

    /// Deliver queued frames in order, including frames queued while
    /// flushing. Returns how many were delivered.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.relay.lock().queue.pop_front();
            let Some((from, frame)) = next else {
                return delivered;
            };
            self.relay.deliver(from, &frame);
            delivered += 1;
        }
    }

    /// Drop queued frames without delivering them.
    pub fn discard_queued(&self) -> usize {
        let mut state = self.relay.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        dropped
    }
}

/// One peer's end of a [`MemoryHub`].
pub struct MemoryTransport {
    id: usize,
    relay: Arc<Relay>,
    callbacks: CallbackSlots,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Simulate losing the connection.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            log::debug!("[MemoryTransport] peer {} disconnected", self.id);
            self.callbacks.notify(ConnectionStatus::Disconnected);
        }
    }

    /// Simulate the connection coming back.
    pub fn reconnect(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            log::debug!("[MemoryTransport] peer {} reconnected", self.id);
            self.callbacks.notify(ConnectionStatus::Connected);
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.relay.route(self.id, frame.to_string());
        Ok(())
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
