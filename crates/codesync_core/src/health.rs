//! Consecutive-failure tracking for resync.
//!
//! Each dropped envelope (malformed or stale) and each abandoned local edit
//! counts as a failure; each successfully applied remote edit resets the
//! count. Once the count reaches the threshold the session should throw away
//! its state and fetch a snapshot from a peer.

/// What the session should do after recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealingAction {
    /// Failure recorded, below the threshold.
    Tolerate,
    /// Threshold reached; request a full resync.
    Resync,
}

/// Counts consecutive sync failures.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    consecutive_failures: u32,
    resync_threshold: u32,
}

impl HealthTracker {
    /// Tracker that recommends a resync after `resync_threshold` failures in a row.
    pub fn with_threshold(resync_threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            resync_threshold: resync_threshold.max(1),
        }
    }

    /// Record a success. Resets the failure counter.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Record a failure and return the recommended action.
    pub fn record_failure(&mut self) -> HealingAction {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.resync_threshold {
            HealingAction::Resync
        } else {
            HealingAction::Tolerate
        }
    }

    /// Current consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Forget recorded failures (after a resync completes).
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::with_threshold(3)
    }
}
