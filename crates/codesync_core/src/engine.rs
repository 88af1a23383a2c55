//! Message-driven synchronization engine.
//!
//! `SyncEngine` owns one room's [`Document`], its queue of unacknowledged
//! local edits, and the per-peer bookkeeping that keeps replicas converging.
//! It performs no I/O: the host feeds it local edits and [`IncomingEvent`]s
//! and executes the returned [`SessionAction`]s.
//!
//! ```text
//!  local edit ──► Document.apply ──► PendingQueue ──► code-change ──► peers
//!                                        ▲
//!  code-change ──► decode ──► rebase ────┘──► Document.apply ──► code-ack
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = SyncEngine::new(SyncConfig::new("room-1"));
//! let actions = engine.process(IncomingEvent::Connected, Instant::now());
//! for action in actions {
//!     match action {
//!         SessionAction::Send(frame) => transport.send(&frame)?,
//!         SessionAction::Emit(event) => handler.on_event(event),
//!     }
//! }
//! ```
//!
//! Time is passed in explicitly so coalescing and resend timing are driven by
//! the caller ([`IncomingEvent::Tick`]).

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::codec::ChangeCodec;
use crate::config::{PayloadFormat, SyncConfig};
use crate::document::{Document, EditOp, Snapshot};
use crate::error::{Result, SyncError};
use crate::events::{ChangeOrigin, EngineState, SyncEvent};
use crate::health::{HealingAction, HealthTracker};
use crate::pending::{Delivery, PendingEdit, PendingQueue};
use crate::protocol::{
    CodeAck, CodeChange, CodePayload, Message, RemoteEnvelope, SyncRequest, SyncSnapshot,
};
use crate::rebase::Order;
use crate::transport::ConnectionStatus;

/// Events fed into the engine by the host.
#[derive(Debug)]
pub enum IncomingEvent {
    /// A text frame arrived from the transport.
    Frame(String),
    /// The transport connected (or reconnected).
    Connected,
    /// The transport disconnected.
    Disconnected,
    /// Periodic timer: flushes coalesced edits and resends unacknowledged ones.
    Tick,
}

/// Actions returned by the engine for the host to execute, in order.
#[derive(Debug)]
pub enum SessionAction {
    /// Send a frame over the transport.
    Send(String),
    /// Deliver an event to the host.
    Emit(SyncEvent),
}

/// Synchronization engine for one room.
pub struct SyncEngine {
    config: SyncConfig,
    codec: ChangeCodec,
    document: Document,
    pending: PendingQueue,
    /// Origin revision of the last envelope we sent; the next one links to it.
    last_sent_origin: Option<u64>,
    /// Per peer, the origin revision of the last envelope applied.
    last_applied: HashMap<String, u64>,
    health: HealthTracker,
    state: EngineState,
    connected: bool,
    awaiting_snapshot: bool,
}

impl SyncEngine {
    /// Create an engine with an empty document.
    ///
    /// The engine starts disconnected; feed [`IncomingEvent::Connected`]
    /// once the transport is up.
    pub fn new(config: SyncConfig) -> Self {
        Self::with_snapshot(config, Snapshot::default())
    }

    /// Create an engine whose document starts from `snapshot`.
    pub fn with_snapshot(config: SyncConfig, snapshot: Snapshot) -> Self {
        Self {
            codec: ChangeCodec::new(config.room_id.clone(), config.sender_id.clone()),
            health: HealthTracker::with_threshold(config.resync_threshold),
            document: Document::from_snapshot(snapshot),
            pending: PendingQueue::new(),
            last_sent_origin: None,
            last_applied: HashMap::new(),
            state: EngineState::Idle,
            connected: false,
            awaiting_snapshot: false,
            config,
        }
    }

    /// Apply a local edit and queue it for the peers.
    ///
    /// No-op edits are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OutOfBounds`] if the edit does not fit the buffer
    /// (nothing is applied or queued) and [`SyncError::SessionClosed`] after
    /// [`SyncEngine::close`].
    pub fn local_edit(&mut self, op: EditOp, now: Instant) -> Result<Vec<SessionAction>> {
        if self.state == EngineState::Closed {
            return Err(SyncError::SessionClosed);
        }
        if op.is_noop() {
            return Ok(Vec::new());
        }

        let origin_revision = self.document.revision();
        let revision = self.document.apply(&op)?;
        let merged =
            self.pending
                .push_local(op, origin_revision, now, self.config.coalesce_window());
        log::debug!(
            "[SyncEngine] local edit -> revision {}{}",
            revision,
            if merged { " (coalesced)" } else { "" }
        );

        let mut actions = vec![SessionAction::Emit(SyncEvent::DocumentChanged {
            revision,
            text: self.document.text().to_string(),
            origin: ChangeOrigin::Local,
        })];
        self.flush(now, false, &mut actions);
        self.update_state(&mut actions);
        Ok(actions)
    }

    /// Process an incoming event and return actions for the host.
    ///
    /// Everything is ignored once the engine is closed.
    pub fn process(&mut self, event: IncomingEvent, now: Instant) -> Vec<SessionAction> {
        if self.state == EngineState::Closed {
            log::trace!("[SyncEngine] closed, ignoring {:?}", event);
            return Vec::new();
        }

        let mut actions = Vec::new();
        match event {
            IncomingEvent::Frame(frame) => self.handle_frame(&frame, now, &mut actions),
            IncomingEvent::Connected => self.handle_connected(now, &mut actions),
            IncomingEvent::Disconnected => self.handle_disconnected(&mut actions),
            IncomingEvent::Tick => {
                self.flush(now, false, &mut actions);
                self.check_ack_timeouts(now, &mut actions);
            }
        }
        self.update_state(&mut actions);
        actions
    }

    /// Ask peers for a snapshot and adopt the first one that arrives.
    pub fn request_resync(&mut self) -> Vec<SessionAction> {
        if self.state == EngineState::Closed {
            return Vec::new();
        }
        let mut actions = Vec::new();
        self.begin_resync(&mut actions);
        actions
    }

    /// Tear down: discard pending edits and ignore everything afterwards.
    pub fn close(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        log::info!(
            "[SyncEngine] closing room {} ({} pending edits discarded)",
            self.codec.room_id(),
            self.pending.len()
        );
        self.pending.clear();
        self.state = EngineState::Closed;
    }

    /// Current buffer and revision.
    pub fn snapshot(&self) -> Snapshot {
        self.document.snapshot()
    }

    /// The document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Unacknowledged local edits.
    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The session config.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether the transport is up as far as the engine knows.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether a resync was requested and no snapshot has arrived yet.
    pub fn is_awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    /// Consecutive failures recorded since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.health.consecutive_failures()
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn handle_frame(&mut self, frame: &str, now: Instant, actions: &mut Vec<SessionAction>) {
        let message = match ChangeCodec::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                self.drop_envelope(&e, actions);
                return;
            }
        };
        if message.room_id() != self.codec.room_id() {
            log::trace!(
                "[SyncEngine] ignoring `{}` for room {}",
                message.event(),
                message.room_id()
            );
            return;
        }

        match message {
            Message::CodeChange(CodeChange {
                code: CodePayload::Envelope(envelope),
                ..
            }) => self.handle_envelope(envelope, actions),
            Message::CodeChange(CodeChange {
                code: CodePayload::Text(text),
                ..
            }) => self.handle_full_text(&text, actions),
            Message::Ack(ack) => self.handle_ack(&ack),
            Message::SyncRequest(request) => self.handle_sync_request(&request, now, actions),
            Message::SyncSnapshot(snapshot) => self.handle_snapshot(snapshot, actions),
        }
    }

    fn handle_envelope(&mut self, envelope: RemoteEnvelope, actions: &mut Vec<SessionAction>) {
        let RemoteEnvelope {
            op,
            origin_revision,
            prev_origin,
            sender_id,
            ..
        } = envelope;

        // Relays that broadcast to the whole room echo our own edits back.
        // Only a peer's ack proves the peer has rebased over them.
        if sender_id == self.codec.sender_id() {
            log::trace!("[SyncEngine] ignoring echo of own edit {origin_revision}");
            return;
        }

        let last_applied = self.last_applied.get(&sender_id).copied();
        if let Some(last_applied) = last_applied
            && origin_revision <= last_applied
        {
            let error = SyncError::StaleRevision {
                sender_id: sender_id.clone(),
                revision: origin_revision,
                last_applied,
            };
            self.drop_envelope(&error, actions);
            // The sender is resending, so our earlier ack was lost.
            self.push_message(&self.codec.ack_message(&sender_id, origin_revision), actions);
            return;
        }
        // Envelopes from one sender form a chain. A broken link means an
        // earlier one is missing: no ack, so the sender resends from the gap.
        if prev_origin != last_applied {
            let error = SyncError::MissingEnvelope {
                sender_id,
                revision: origin_revision,
                prev_origin,
                last_applied,
            };
            self.drop_envelope(&error, actions);
            return;
        }

        // Ties resolve by sender id so both sides pick the same winner.
        let order = if sender_id.as_str() < self.codec.sender_id() {
            Order::Before
        } else {
            Order::After
        };
        // Rebase on a copy so a rejected edit leaves the queue untouched.
        let mut rebased = self.pending.clone();
        let reconciled = rebased.rebase(&op, order);
        let revision = match reconciled {
            Some(op) => match self.document.apply(&op) {
                Ok(revision) => Some(revision),
                Err(e) => {
                    self.drop_envelope(&e, actions);
                    return;
                }
            },
            None => None,
        };

        if !self.pending.is_empty() {
            log::debug!(
                "[SyncEngine] rebased {} pending edits over edit {} from {}",
                self.pending.len(),
                origin_revision,
                sender_id
            );
        }
        self.pending = rebased;
        self.last_applied.insert(sender_id.clone(), origin_revision);
        self.health.record_success();
        self.push_message(&self.codec.ack_message(&sender_id, origin_revision), actions);

        match revision {
            Some(revision) => actions.push(SessionAction::Emit(SyncEvent::DocumentChanged {
                revision,
                text: self.document.text().to_string(),
                origin: ChangeOrigin::Remote {
                    sender_id: Some(sender_id),
                },
            })),
            None => log::debug!(
                "[SyncEngine] edit {origin_revision} from {sender_id} consumed by pending edits"
            ),
        }
    }

    /// Whole-buffer update from a peer that only sends full text.
    fn handle_full_text(&mut self, text: &str, actions: &mut Vec<SessionAction>) {
        if !self.pending.is_empty() {
            log::warn!(
                "[SyncEngine] full-text update overrides {} pending edits",
                self.pending.len()
            );
            self.pending.clear();
        }
        self.health.record_success();

        let Some(op) = EditOp::diff(self.document.text(), text) else {
            return;
        };
        match self.document.apply(&op) {
            Ok(revision) => actions.push(SessionAction::Emit(SyncEvent::DocumentChanged {
                revision,
                text: self.document.text().to_string(),
                origin: ChangeOrigin::Remote { sender_id: None },
            })),
            Err(e) => log::error!("[SyncEngine] full-text diff did not apply: {e}"),
        }
    }

    fn handle_ack(&mut self, ack: &CodeAck) {
        if ack.target != self.codec.sender_id() {
            return;
        }
        let cleared = self.pending.acknowledge(ack.revision);
        log::debug!(
            "[SyncEngine] {} acknowledged revision {} ({} edits cleared)",
            ack.sender_id,
            ack.revision,
            cleared
        );
    }

    fn handle_sync_request(
        &mut self,
        request: &SyncRequest,
        now: Instant,
        actions: &mut Vec<SessionAction>,
    ) {
        if request.sender_id == self.codec.sender_id() || self.awaiting_snapshot {
            return;
        }
        // Pending edits are part of the snapshot. Get them out to every other
        // peer, then stop treating them as concurrent with the requester.
        self.flush(now, true, actions);
        let snapshot = self.document.snapshot();
        log::info!(
            "[SyncEngine] sending snapshot at revision {} to {}",
            snapshot.revision,
            request.sender_id
        );
        // The requester starts a new envelope chain after adopting the snapshot.
        self.last_applied.remove(&request.sender_id);
        let mut cursors: BTreeMap<String, u64> = self
            .last_applied
            .iter()
            .map(|(sender, origin)| (sender.clone(), *origin))
            .collect();
        if let Some(origin) = self.last_sent_origin {
            cursors.insert(self.codec.sender_id().to_string(), origin);
        }
        self.push_message(
            &self
                .codec
                .sync_snapshot_message(&request.sender_id, snapshot, cursors),
            actions,
        );
        self.pending.clear();
    }

    fn handle_snapshot(&mut self, snapshot: SyncSnapshot, actions: &mut Vec<SessionAction>) {
        if snapshot.target != self.codec.sender_id() || !self.awaiting_snapshot {
            return;
        }
        let SyncSnapshot {
            sender_id,
            buffer,
            revision,
            mut cursors,
            ..
        } = snapshot;

        log::info!(
            "[SyncEngine] resynced from {} at revision {} ({} pending edits discarded)",
            sender_id,
            revision,
            self.pending.len()
        );
        // Edits held back while waiting never reached anyone.
        for entry in self.pending.iter().filter(|e| !e.is_in_flight()) {
            actions.push(SessionAction::Emit(SyncEvent::EditDropped {
                origin_revision: entry.origin_revision,
            }));
        }
        self.document.reset(Snapshot { buffer, revision });
        self.pending.clear();
        cursors.remove(self.codec.sender_id());
        self.last_applied = cursors.into_iter().collect();
        self.last_sent_origin = None;
        self.health.reset();
        self.awaiting_snapshot = false;

        actions.push(SessionAction::Emit(SyncEvent::Resynced { revision }));
        actions.push(SessionAction::Emit(SyncEvent::DocumentChanged {
            revision,
            text: self.document.text().to_string(),
            origin: ChangeOrigin::Resync,
        }));
    }

    fn handle_connected(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        let newly_connected = !self.connected;
        if newly_connected {
            self.connected = true;
            log::info!("[SyncEngine] connected to room {}", self.codec.room_id());
            actions.push(SessionAction::Emit(SyncEvent::StatusChanged {
                status: ConnectionStatus::Connected,
            }));
        }
        if self.awaiting_snapshot {
            self.push_message(&self.codec.sync_request_message(), actions);
            return;
        }
        if newly_connected {
            for entry in self.pending.in_flight_mut() {
                if let Some(frame) = envelope_frame(&self.codec, entry) {
                    actions.push(SessionAction::Send(frame));
                }
                if let Delivery::InFlight { sent_at, .. } = &mut entry.delivery {
                    *sent_at = now;
                }
            }
        }
        self.flush(now, true, actions);
    }

    fn handle_disconnected(&mut self, actions: &mut Vec<SessionAction>) {
        if !self.connected {
            return;
        }
        self.connected = false;
        log::info!(
            "[SyncEngine] disconnected from room {} ({} pending edits held)",
            self.codec.room_id(),
            self.pending.len()
        );
        actions.push(SessionAction::Emit(SyncEvent::StatusChanged {
            status: ConnectionStatus::Disconnected,
        }));
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Send unsent edits that are due. Nothing goes out while disconnected
    /// or while waiting for a snapshot that will replace the buffer.
    fn flush(&mut self, now: Instant, force: bool, actions: &mut Vec<SessionAction>) {
        if !self.connected || self.awaiting_snapshot {
            return;
        }
        let window = self.config.coalesce_window();

        match self.config.payload_format {
            PayloadFormat::Envelope => {
                for entry in self.pending.due_unsent(now, window, force) {
                    entry.prev_origin = self.last_sent_origin;
                    let Some(frame) = envelope_frame(&self.codec, entry) else {
                        continue;
                    };
                    log::trace!("[SyncEngine] sending edit {}", entry.origin_revision);
                    self.last_sent_origin = Some(entry.origin_revision);
                    entry.delivery = Delivery::InFlight {
                        sent_at: now,
                        resends: 0,
                    };
                    actions.push(SessionAction::Send(frame));
                }
            }
            PayloadFormat::FullText => {
                // Full-text peers never acknowledge, so nothing stays in flight.
                if self.pending.due_unsent(now, window, force).is_empty() {
                    return;
                }
                self.pending.clear();
                self.push_message(&self.codec.full_text_message(self.document.text()), actions);
            }
        }
    }

    /// Resend edits whose ack timed out; abandon those out of attempts.
    fn check_ack_timeouts(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        if !self.connected || self.awaiting_snapshot {
            return;
        }
        let timeout = self.config.ack_timeout();
        let max_resends = self.config.max_resends;

        let mut abandoned = Vec::new();
        for entry in self.pending.in_flight_mut() {
            let origin_revision = entry.origin_revision;
            let Delivery::InFlight { sent_at, resends } = entry.delivery else {
                continue;
            };
            if now.saturating_duration_since(sent_at) < timeout {
                continue;
            }
            if resends >= max_resends {
                abandoned.push(origin_revision);
                continue;
            }
            // Resend the edit as rebased so far, under its original revision.
            if let Some(frame) = envelope_frame(&self.codec, entry) {
                log::info!(
                    "[SyncEngine] resending edit {origin_revision} (attempt {})",
                    resends + 1
                );
                actions.push(SessionAction::Send(frame));
            }
            entry.delivery = Delivery::InFlight {
                sent_at: now,
                resends: resends + 1,
            };
        }

        for origin_revision in abandoned {
            if self.pending.abandon(origin_revision).is_some() {
                log::warn!(
                    "[SyncEngine] edit {origin_revision} unacknowledged after {max_resends} resends, dropping"
                );
                actions.push(SessionAction::Emit(SyncEvent::EditDropped { origin_revision }));
                self.record_failure(actions);
            }
        }
    }

    fn push_message(&self, message: &Message, actions: &mut Vec<SessionAction>) {
        if !self.connected {
            log::trace!("[SyncEngine] disconnected, not sending `{}`", message.event());
            return;
        }
        match ChangeCodec::frame(message) {
            Ok(frame) => actions.push(SessionAction::Send(frame)),
            Err(e) => log::error!("[SyncEngine] failed to encode `{}`: {e}", message.event()),
        }
    }

    // ========================================================================
    // Health
    // ========================================================================

    fn drop_envelope(&mut self, error: &SyncError, actions: &mut Vec<SessionAction>) {
        log::warn!("[SyncEngine] dropping envelope: {error}");
        actions.push(SessionAction::Emit(SyncEvent::EnvelopeDropped {
            reason: error.to_string(),
        }));
        self.record_failure(actions);
    }

    fn record_failure(&mut self, actions: &mut Vec<SessionAction>) {
        if self.health.record_failure() == HealingAction::Resync && !self.awaiting_snapshot {
            log::warn!(
                "[SyncEngine] {} consecutive failures, requesting resync",
                self.health.consecutive_failures()
            );
            self.begin_resync(actions);
        }
    }

    fn begin_resync(&mut self, actions: &mut Vec<SessionAction>) {
        self.awaiting_snapshot = true;
        actions.push(SessionAction::Emit(SyncEvent::ResyncRequested));
        self.push_message(&self.codec.sync_request_message(), actions);
    }

    fn update_state(&mut self, actions: &mut Vec<SessionAction>) {
        if self.state == EngineState::Closed {
            return;
        }
        let next = if self.pending.has_unsent() {
            EngineState::LocalEditing
        } else if self.pending.has_in_flight() {
            EngineState::AwaitingAck
        } else {
            EngineState::Idle
        };
        if next != self.state {
            log::debug!("[SyncEngine] {:?} -> {:?}", self.state, next);
            self.state = next;
            actions.push(SessionAction::Emit(SyncEvent::StateChanged { state: next }));
        }
    }
}

/// Frame a pending edit as a `code-change` envelope.
fn envelope_frame(codec: &ChangeCodec, entry: &PendingEdit) -> Option<String> {
    let envelope = codec.encode(&entry.op, entry.origin_revision, entry.prev_origin);
    match ChangeCodec::frame(&codec.change_message(envelope)) {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::error!(
                "[SyncEngine] failed to encode edit {}: {e}",
                entry.origin_revision
            );
            None
        }
    }
}
