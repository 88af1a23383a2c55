//! Queue of local edits that peers have not acknowledged yet.
//!
//! Entries are kept in the order they were made. An entry starts out
//! [`Delivery::Unsent`] (still open for coalescing, or held back while
//! disconnected) and becomes [`Delivery::InFlight`] once its frame is handed
//! to the transport. Entries leave the queue when acknowledged, when a
//! concurrent remote edit consumes them during rebase, or when the engine
//! gives up resending them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::document::EditOp;
use crate::rebase::{Order, coalesce, transform};

/// Delivery state of a pending edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Not handed to the transport yet.
    Unsent,
    /// Sent and awaiting acknowledgement.
    InFlight {
        /// When the edit was last sent.
        sent_at: Instant,
        /// Resends performed so far.
        resends: u32,
    },
}

/// A local edit awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingEdit {
    /// The edit, rebased over every remote edit received since it was made.
    pub op: EditOp,
    /// Local revision the edit was originally computed against.
    pub origin_revision: u64,
    /// Origin revision of the envelope sent before this one, fixed when the
    /// edit is first sent.
    pub(crate) prev_origin: Option<u64>,
    pub(crate) last_edit_at: Instant,
    pub(crate) delivery: Delivery,
}

impl PendingEdit {
    /// Whether the edit has been sent.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.delivery, Delivery::InFlight { .. })
    }

    /// Delivery state.
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }
}

/// Ordered local edits not yet acknowledged by peers.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingEdit>,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending edits.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending edits, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingEdit> {
        self.entries.iter()
    }

    /// Returns true if any edit has not been sent yet.
    pub fn has_unsent(&self) -> bool {
        self.entries.iter().any(|e| !e.is_in_flight())
    }

    /// Returns true if any edit is awaiting acknowledgement.
    pub fn has_in_flight(&self) -> bool {
        self.entries.iter().any(PendingEdit::is_in_flight)
    }

    /// Queue a local edit, merging it into the newest unsent edit when it
    /// lands in the same region within `window`.
    ///
    /// Returns true if the edit was merged.
    pub fn push_local(
        &mut self,
        op: EditOp,
        origin_revision: u64,
        now: Instant,
        window: Duration,
    ) -> bool {
        if !window.is_zero()
            && let Some(last) = self.entries.back_mut()
            && !last.is_in_flight()
            && now.saturating_duration_since(last.last_edit_at) <= window
            && let Some(merged) = coalesce(&last.op, &op)
        {
            if merged.is_noop() {
                log::trace!("[PendingQueue] edits cancelled out, dropping entry");
                self.entries.pop_back();
            } else {
                last.op = merged;
                last.last_edit_at = now;
            }
            return true;
        }

        self.entries.push_back(PendingEdit {
            op,
            origin_revision,
            prev_origin: None,
            last_edit_at: now,
            delivery: Delivery::Unsent,
        });
        false
    }

    /// Unsent edits ready to go out, oldest first.
    ///
    /// An unsent edit is ready when `force` is set, when a newer edit follows
    /// it (nothing can merge into it anymore), or when `window` has elapsed
    /// since it was last extended.
    pub(crate) fn due_unsent(
        &mut self,
        now: Instant,
        window: Duration,
        force: bool,
    ) -> Vec<&mut PendingEdit> {
        let last = self.entries.len().saturating_sub(1);
        self.entries
            .iter_mut()
            .enumerate()
            .filter(|(_, e)| !e.is_in_flight())
            .filter(move |(i, e)| {
                force || *i < last || now.saturating_duration_since(e.last_edit_at) >= window
            })
            .map(|(_, e)| e)
            .collect()
    }

    /// In-flight edits, oldest first.
    pub(crate) fn in_flight_mut(&mut self) -> impl Iterator<Item = &mut PendingEdit> {
        self.entries.iter_mut().filter(|e| e.is_in_flight())
    }

    /// Drop every in-flight edit whose origin revision is `<= revision`.
    ///
    /// Returns how many edits were acknowledged.
    pub fn acknowledge(&mut self, revision: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.is_in_flight() && e.origin_revision <= revision));
        before - self.entries.len()
    }

    /// Remove the in-flight edit with the given origin revision.
    pub(crate) fn abandon(&mut self, origin_revision: u64) -> Option<PendingEdit> {
        let index = self
            .entries
            .iter()
            .position(|e| e.is_in_flight() && e.origin_revision == origin_revision)?;
        self.entries.remove(index)
    }

    /// Rebase a concurrent remote edit over every pending edit.
    ///
    /// `order` places the remote edit relative to all pending edits; both
    /// peers must derive the same order for ties to resolve identically. The
    /// remote edit is transformed against each pending edit in turn while
    /// each pending edit is transformed against it, so afterwards the pending
    /// edits describe the same intent on top of the remote change. Pending
    /// edits consumed by the remote edit are removed. Returns the remote edit
    /// ready to apply to the current buffer, or `None` if the pending edits
    /// consumed it.
    pub fn rebase(&mut self, remote: &EditOp, order: Order) -> Option<EditOp> {
        let mut incoming = Some(remote.clone());
        self.entries.retain_mut(|entry| {
            let Some(current) = incoming.take() else {
                return true;
            };
            let rebased = transform(&entry.op, &current, order.flip());
            incoming = transform(&current, &entry.op, order);
            match rebased {
                Some(op) => {
                    entry.op = op;
                    true
                }
                None => {
                    log::debug!(
                        "[PendingQueue] pending edit at revision {} consumed by remote edit",
                        entry.origin_revision
                    );
                    false
                }
            }
        });
        incoming
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(150);

    fn mark_sent(queue: &mut PendingQueue, now: Instant) {
        for entry in queue.due_unsent(now, WINDOW, true) {
            entry.delivery = Delivery::InFlight {
                sent_at: now,
                resends: 0,
            };
        }
    }

    #[test]
    fn test_typing_within_window_coalesces() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        assert!(!queue.push_local(EditOp::insert(0, "h"), 0, t0, WINDOW));
        assert!(queue.push_local(EditOp::insert(1, "i"), 1, t0 + Duration::from_millis(50), WINDOW));
        assert!(queue.push_local(EditOp::insert(2, "!"), 2, t0 + Duration::from_millis(180), WINDOW));

        assert_eq!(queue.len(), 1);
        let entry = queue.iter().next().unwrap();
        assert_eq!(entry.op, EditOp::insert(0, "hi!"));
        assert_eq!(entry.origin_revision, 0);
    }

    #[test]
    fn test_edit_after_window_starts_new_entry() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(0, "a"), 0, t0, WINDOW);
        assert!(!queue.push_local(EditOp::insert(1, "b"), 1, t0 + Duration::from_millis(151), WINDOW));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_zero_window_never_coalesces() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(0, "a"), 0, t0, Duration::ZERO);
        queue.push_local(EditOp::insert(1, "b"), 1, t0, Duration::ZERO);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_in_flight_entries_are_not_merged() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(0, "a"), 0, t0, WINDOW);
        mark_sent(&mut queue, t0);
        assert!(!queue.push_local(EditOp::insert(1, "b"), 1, t0, WINDOW));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cancelling_edits_drop_entry() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(4, "x"), 3, t0, WINDOW);
        assert!(queue.push_local(EditOp::delete(4, 1), 4, t0, WINDOW));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_due_unsent() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(0, "a"), 0, t0, WINDOW);
        queue.push_local(EditOp::insert(9, "b"), 1, t0, WINDOW);

        // The older entry can no longer merge; the newer waits for its window.
        let due: Vec<u64> = queue
            .due_unsent(t0, WINDOW, false)
            .into_iter()
            .map(|e| e.origin_revision)
            .collect();
        assert_eq!(due, vec![0]);

        assert_eq!(queue.due_unsent(t0 + WINDOW, WINDOW, false).len(), 2);
        assert_eq!(queue.due_unsent(t0, WINDOW, true).len(), 2);
    }

    #[test]
    fn test_acknowledge_only_in_flight_up_to_revision() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(0, "a"), 0, t0, Duration::ZERO);
        queue.push_local(EditOp::insert(1, "b"), 1, t0, Duration::ZERO);
        mark_sent(&mut queue, t0);
        queue.push_local(EditOp::insert(2, "c"), 2, t0, Duration::ZERO);

        assert_eq!(queue.acknowledge(0), 1);
        assert_eq!(queue.acknowledge(5), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.has_unsent());
        assert!(!queue.has_in_flight());
    }

    #[test]
    fn test_rebase_preserves_local_insert() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(5, " world"), 5, t0, Duration::ZERO);

        let remote = queue.rebase(&EditOp::delete(0, 5), Order::Before);
        assert_eq!(remote, Some(EditOp::delete(0, 5)));
        assert_eq!(queue.iter().next().unwrap().op, EditOp::insert(0, " world"));
    }

    #[test]
    fn test_rebase_removes_consumed_entries() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(3, "X"), 0, t0, Duration::ZERO);
        queue.push_local(EditOp::insert(20, "Y"), 1, t0, Duration::ZERO);

        // Remote deleted the region holding our first insert.
        let remote = queue.rebase(&EditOp::delete(1, 5), Order::After);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.iter().next().unwrap().op, EditOp::insert(14, "Y"));
        // The remote delete grows to cover our pending "X".
        assert_eq!(remote, Some(EditOp::delete(1, 6)));
    }

    #[test]
    fn test_rebase_tie_follows_order() {
        let t0 = Instant::now();
        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(2, "L"), 0, t0, Duration::ZERO);
        let remote = queue.rebase(&EditOp::insert(2, "R"), Order::Before);
        // Remote first: it stays put and the local insert moves right.
        assert_eq!(remote, Some(EditOp::insert(2, "R")));
        assert_eq!(queue.iter().next().unwrap().op, EditOp::insert(3, "L"));

        let mut queue = PendingQueue::new();
        queue.push_local(EditOp::insert(2, "L"), 0, t0, Duration::ZERO);
        let remote = queue.rebase(&EditOp::insert(2, "R"), Order::After);
        assert_eq!(remote, Some(EditOp::insert(3, "R")));
        assert_eq!(queue.iter().next().unwrap().op, EditOp::insert(2, "L"));
    }
}
