//! Per-resource lock request queues and the grant engine.

use crate::lock::LockMode;
use crate::types::{RowId, TableId, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// A single transaction's request for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    /// Requesting transaction.
    pub txn_id: TransactionId,
    /// Requested mode.
    pub mode: LockMode,
    /// Table the resource belongs to.
    pub table_id: TableId,
    /// Row, for row-level requests.
    pub row_id: Option<RowId>,
    /// Whether the request has been granted.
    pub granted: bool,
}

impl LockRequest {
    /// Creates an ungranted table request.
    #[must_use]
    pub fn table(txn_id: TransactionId, mode: LockMode, table_id: TableId) -> Self {
        Self {
            txn_id,
            mode,
            table_id,
            row_id: None,
            granted: false,
        }
    }

    /// Creates an ungranted row request.
    #[must_use]
    pub fn row(txn_id: TransactionId, mode: LockMode, table_id: TableId, row_id: RowId) -> Self {
        Self {
            row_id: Some(row_id),
            ..Self::table(txn_id, mode, table_id)
        }
    }
}

/// The contents of a [`LockRequestQueue`], guarded by its mutex.
///
/// Granted requests always form a prefix of `requests`.
#[derive(Debug, Default)]
pub struct QueueState {
    /// Requests in arrival order, upgrades reprioritized after the granted prefix.
    requests: VecDeque<LockRequest>,
    /// Transaction with an upgrade in flight on this resource.
    upgrading: Option<TransactionId>,
}

impl QueueState {
    /// Appends a new request at the tail.
    pub fn push_back(&mut self, request: LockRequest) {
        self.requests.push_back(request);
    }

    /// Inserts an upgrade request ahead of every waiting request and marks
    /// the queue as upgrading.
    pub fn insert_upgrade(&mut self, request: LockRequest) {
        let position = self
            .requests
            .iter()
            .position(|r| !r.granted)
            .unwrap_or(self.requests.len());
        self.upgrading = Some(request.txn_id);
        self.requests.insert(position, request);
    }

    /// Removes and returns the request of `txn_id`.
    pub fn remove(&mut self, txn_id: TransactionId) -> Option<LockRequest> {
        let position = self.requests.iter().position(|r| r.txn_id == txn_id)?;
        self.requests.remove(position)
    }

    /// Returns the request of `txn_id`.
    #[must_use]
    pub fn find(&self, txn_id: TransactionId) -> Option<&LockRequest> {
        self.requests.iter().find(|r| r.txn_id == txn_id)
    }

    /// Returns true if `txn_id` has a request in the queue.
    #[must_use]
    pub fn has_request(&self, txn_id: TransactionId) -> bool {
        self.find(txn_id).is_some()
    }

    /// Returns true if the request of `txn_id` has been granted.
    #[must_use]
    pub fn is_granted(&self, txn_id: TransactionId) -> bool {
        self.find(txn_id).is_some_and(|r| r.granted)
    }

    /// Returns the transaction currently upgrading, if any.
    #[must_use]
    pub fn upgrading(&self) -> Option<TransactionId> {
        self.upgrading
    }

    /// Clears the upgrade marker if `txn_id` owns it.
    pub fn clear_upgrading(&mut self, txn_id: TransactionId) {
        if self.upgrading == Some(txn_id) {
            self.upgrading = None;
        }
    }

    /// Iterates over requests in queue order.
    pub fn requests(&self) -> impl Iterator<Item = &LockRequest> {
        self.requests.iter()
    }

    /// Returns the number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns true if the queue holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Grants every leading waiter compatible with all granted modes.
    ///
    /// Waiters are visited head to tail and the scan stops at the first one
    /// that cannot be granted, so a blocked request is never overtaken.
    /// Returns the number of requests granted by this pass.
    pub fn grant_compatible(&mut self) -> usize {
        let mut held: Vec<LockMode> = self
            .requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| r.mode)
            .collect();

        let mut newly_granted = 0;
        for request in self.requests.iter_mut().filter(|r| !r.granted) {
            if !request.mode.is_compatible_with_all(&held) {
                break;
            }
            request.granted = true;
            held.push(request.mode);
            newly_granted += 1;
        }
        newly_granted
    }
}

/// A resource's request queue with its mutex and condition variable.
///
/// Created on first access and shared by every transaction touching the
/// resource for the lifetime of the lock manager.
#[derive(Debug, Default)]
pub struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the queue contents.
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Blocks on the queue's condition variable, releasing `guard` while asleep.
    pub fn wait(&self, guard: &mut parking_lot::MutexGuard<'_, QueueState>) {
        self.cv.wait(guard);
    }

    /// Wakes every waiter; each re-checks its own predicate.
    pub fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Runs the grant engine on `state` and wakes all waiters.
    pub fn grant_and_notify(&self, state: &mut QueueState) -> usize {
        let granted = state.grant_compatible();
        self.cv.notify_all();
        granted
    }

    /// Returns a copy of the requests in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LockRequest> {
        self.state.lock().requests.iter().cloned().collect()
    }
}
