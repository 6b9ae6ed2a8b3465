//! Lock manager statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = lock_manager.stats().snapshot();
//! println!("waits: {}", stats.waits);
//! println!("deadlocks: {}", stats.deadlocks_resolved);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock manager counters.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values are monotonically increasing.
#[derive(Debug, Default)]
pub struct LockStats {
    // Acquire path
    /// Lock requests that reached a queue (new or upgrade).
    lock_requests: AtomicU64,
    /// Requests granted without blocking.
    immediate_grants: AtomicU64,
    /// Requests that had to block.
    waits: AtomicU64,
    /// Upgrade requests.
    upgrades: AtomicU64,
    /// Blocked requests that ended because the transaction was aborted.
    aborted_waits: AtomicU64,

    // Release path
    /// Successful unlocks.
    unlocks: AtomicU64,

    // Aborts
    /// Synchronous aborts for protocol violations.
    policy_aborts: AtomicU64,

    // Detector
    /// Detection passes run.
    detection_passes: AtomicU64,
    /// Victims aborted to break a cycle.
    deadlocks_resolved: AtomicU64,
}

/// Point-in-time copy of [`LockStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStatsSnapshot {
    /// Lock requests that reached a queue.
    pub lock_requests: u64,
    /// Requests granted without blocking.
    pub immediate_grants: u64,
    /// Requests that had to block.
    pub waits: u64,
    /// Upgrade requests.
    pub upgrades: u64,
    /// Blocked requests ended by abort.
    pub aborted_waits: u64,
    /// Successful unlocks.
    pub unlocks: u64,
    /// Synchronous protocol aborts.
    pub policy_aborts: u64,
    /// Detection passes run.
    pub detection_passes: u64,
    /// Deadlock victims.
    pub deadlocks_resolved: u64,
}

impl LockStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.lock_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_immediate_grant(&self) {
        self.immediate_grants.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upgrade(&self) {
        self.upgrades.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted_wait(&self) {
        self.aborted_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unlock(&self) {
        self.unlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_policy_abort(&self) {
        self.policy_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detection_pass(&self) {
        self.detection_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of requests that had to block.
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    /// Returns the number of deadlock victims.
    pub fn deadlocks_resolved(&self) -> u64 {
        self.deadlocks_resolved.load(Ordering::Relaxed)
    }

    /// Returns the number of detection passes run.
    pub fn detection_passes(&self) -> u64 {
        self.detection_passes.load(Ordering::Relaxed)
    }

    /// Returns a copy of every counter.
    pub fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            lock_requests: self.lock_requests.load(Ordering::Relaxed),
            immediate_grants: self.immediate_grants.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
            aborted_waits: self.aborted_waits.load(Ordering::Relaxed),
            unlocks: self.unlocks.load(Ordering::Relaxed),
            policy_aborts: self.policy_aborts.load(Ordering::Relaxed),
            detection_passes: self.detection_passes.load(Ordering::Relaxed),
            deadlocks_resolved: self.deadlocks_resolved.load(Ordering::Relaxed),
        }
    }
}
