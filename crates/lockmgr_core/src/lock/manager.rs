//! The lock manager: acquire/release protocol over table and row queues.

use crate::config::LockManagerConfig;
use crate::error::{AbortReason, LockError, LockResult};
use crate::lock::deadlock::{DeadlockDetector, WaitsForGraph};
use crate::lock::policy;
use crate::lock::queue::{LockRequest, LockRequestQueue};
use crate::lock::LockMode;
use crate::stats::LockStats;
use crate::transaction::{LockSet, Transaction};
use crate::types::{RowId, TableId, TransactionId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// A lockable resource: a whole table or one row of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Table(TableId),
    Row(TableId, RowId),
}

impl Resource {
    fn held_mode(self, locks: &LockSet) -> Option<LockMode> {
        match self {
            Resource::Table(table) => locks.table_mode(table),
            Resource::Row(table, row) => locks.row_mode(table, row),
        }
    }

    fn record(self, locks: &mut LockSet, mode: LockMode) {
        match self {
            Resource::Table(table) => locks.insert_table(table, mode),
            Resource::Row(table, row) => locks.insert_row(table, row, mode),
        }
    }

    fn forget(self, locks: &mut LockSet, mode: LockMode) -> bool {
        match self {
            Resource::Table(table) => locks.remove_table(table, mode),
            Resource::Row(table, row) => locks.remove_row(table, row, mode),
        }
    }

    fn request(self, txn_id: TransactionId, mode: LockMode) -> LockRequest {
        match self {
            Resource::Table(table) => LockRequest::table(txn_id, mode, table),
            Resource::Row(table, row) => LockRequest::row(txn_id, mode, table, row),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Table(table) => write!(f, "{table}"),
            Resource::Row(table, row) => write!(f, "{table}/{row}"),
        }
    }
}

/// State shared between the lock manager and its detector thread.
struct LockTable {
    config: LockManagerConfig,
    /// Queues keyed by table. The map mutex guards structure only and is
    /// never held while waiting on a queue.
    table_lock_map: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    /// Queues keyed by row.
    row_lock_map: Mutex<HashMap<RowId, Arc<LockRequestQueue>>>,
    /// Wait-for graph used by detection passes and the edge API.
    waits_for: Mutex<WaitsForGraph>,
    /// Every transaction that has queued a request, for abort-by-id.
    transactions: Mutex<HashMap<TransactionId, Weak<Transaction>>>,
    stats: LockStats,
}

impl LockTable {
    fn new(config: LockManagerConfig) -> Self {
        Self {
            config,
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::new()),
            transactions: Mutex::new(HashMap::new()),
            stats: LockStats::new(),
        }
    }

    // === Queue and registry lookup ===

    /// Returns the queue for `resource`, creating it on first access.
    fn queue(&self, resource: Resource) -> Arc<LockRequestQueue> {
        match resource {
            Resource::Table(table) => {
                Arc::clone(self.table_lock_map.lock().entry(table).or_default())
            }
            Resource::Row(_, row) => Arc::clone(self.row_lock_map.lock().entry(row).or_default()),
        }
    }

    fn existing_queue(&self, resource: Resource) -> Option<Arc<LockRequestQueue>> {
        match resource {
            Resource::Table(table) => self.table_lock_map.lock().get(&table).cloned(),
            Resource::Row(_, row) => self.row_lock_map.lock().get(&row).cloned(),
        }
    }

    /// Snapshots every queue handle, tables first, so callers can visit them
    /// one at a time without holding a map mutex.
    fn all_queues(&self) -> Vec<Arc<LockRequestQueue>> {
        let mut queues: Vec<_> = self.table_lock_map.lock().values().cloned().collect();
        queues.extend(self.row_lock_map.lock().values().cloned());
        queues
    }

    /// Records `txn` for abort-by-id. Entries of dropped transactions are
    /// pruned whenever a new one is added.
    fn register(&self, txn: &Arc<Transaction>) {
        let mut transactions = self.transactions.lock();
        if transactions
            .get(&txn.id())
            .is_some_and(|known| known.strong_count() > 0)
        {
            return;
        }
        transactions.retain(|_, known| known.strong_count() > 0);
        transactions.insert(txn.id(), Arc::downgrade(txn));
    }

    fn lookup(&self, txn_id: TransactionId) -> Option<Arc<Transaction>> {
        self.transactions.lock().get(&txn_id).and_then(Weak::upgrade)
    }

    // === Abort helpers ===

    /// Aborts `txn` for a protocol violation detected on its own thread.
    fn abort_with<T>(&self, txn: &Transaction, reason: AbortReason) -> LockResult<T> {
        txn.abort(Some(reason));
        self.stats.record_policy_abort();
        warn!(txn = %txn.id(), %reason, "transaction aborted");
        Err(LockError::aborted(txn.id(), reason))
    }

    fn check(&self, txn: &Transaction, verdict: Result<(), AbortReason>) -> LockResult<()> {
        match verdict {
            Ok(()) => Ok(()),
            Err(reason) => self.abort_with(txn, reason),
        }
    }

    /// Re-runs the grant engine and wakes every queue `txn_id` has a
    /// request in, so a blocked call re-checks its predicate.
    fn wake_pending(&self, txn_id: TransactionId) {
        for queue in self.all_queues() {
            let mut state = queue.lock();
            if state.has_request(txn_id) {
                queue.grant_and_notify(&mut state);
            }
        }
    }

    // === Acquire ===

    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        resource: Resource,
    ) -> LockResult<bool> {
        let txn_id = txn.id();
        let txn_state = txn.state();
        if txn_state.is_terminal() {
            return Err(LockError::not_active(txn_id, txn_state));
        }
        self.register(txn);

        let held = txn.with_locks(|locks| resource.held_mode(locks));
        if held == Some(mode) {
            return Ok(true);
        }

        self.check(txn, policy::check_isolation(txn.isolation(), txn_state, mode))?;
        if let Resource::Row(table, _) = resource {
            self.check(txn, policy::check_row_mode(mode))?;
            let table_mode = txn.table_lock_mode(table);
            self.check(txn, policy::check_table_lock_for_row(table_mode, mode))?;
        }
        if let Some(held) = held {
            self.check(txn, policy::check_upgrade(held, mode))?;
        }

        let queue = self.queue(resource);
        let mut state = queue.lock();
        self.stats.record_request();

        if let Some(held) = held {
            if let Some(other) = state.upgrading() {
                drop(state);
                debug!(txn = %txn_id, upgrading = %other, %resource, "upgrade conflict");
                return self.abort_with(txn, AbortReason::UpgradeConflict);
            }
            if state.remove(txn_id).is_none() {
                drop(state);
                return Err(self.invariant_violation(format!(
                    "{txn_id} holds {held} on {resource} but has no request queued"
                )));
            }
            txn.with_locks(|locks| resource.forget(locks, held));
            state.insert_upgrade(resource.request(txn_id, mode));
            self.stats.record_upgrade();
            debug!(txn = %txn_id, from = %held, to = %mode, %resource, "upgrading lock");
        } else {
            state.push_back(resource.request(txn_id, mode));
        }

        let granted = queue.grant_and_notify(&mut state);
        trace!(%resource, granted, "grant pass after enqueue");

        if state.is_granted(txn_id) {
            self.stats.record_immediate_grant();
        } else {
            self.stats.record_wait();
            debug!(txn = %txn_id, %mode, %resource, "waiting for lock");
            while !state.is_granted(txn_id) && !txn.is_aborted() {
                queue.wait(&mut state);
            }
        }

        state.clear_upgrading(txn_id);

        if txn.is_aborted() {
            state.remove(txn_id);
            queue.grant_and_notify(&mut state);
            self.stats.record_aborted_wait();
            debug!(txn = %txn_id, %mode, %resource, "lock wait ended by abort");
            return Ok(false);
        }

        txn.with_locks(|locks| resource.record(locks, mode));
        debug!(txn = %txn_id, %mode, %resource, "lock granted");
        Ok(true)
    }

    // === Release ===

    fn release(&self, txn: &Transaction, resource: Resource, force: bool) -> LockResult<bool> {
        let txn_id = txn.id();
        let Some(mode) = txn.with_locks(|locks| resource.held_mode(locks)) else {
            return self.abort_with(txn, AbortReason::AttemptedUnlockButNoLockHeld);
        };
        if let Resource::Table(table) = resource {
            if txn.holds_row_locks_on(table) {
                return self.abort_with(txn, AbortReason::TableUnlockedBeforeUnlockingRows);
            }
        }

        let Some(queue) = self.existing_queue(resource) else {
            return Err(self.invariant_violation(format!(
                "{txn_id} holds {mode} on {resource} but no queue exists"
            )));
        };

        {
            let mut state = queue.lock();
            if state.remove(txn_id).is_none() {
                drop(state);
                return Err(self.invariant_violation(format!(
                    "{txn_id} holds {mode} on {resource} but has no request queued"
                )));
            }
            txn.with_locks(|locks| resource.forget(locks, mode));
            let granted = queue.grant_and_notify(&mut state);
            trace!(%resource, granted, "grant pass after release");
        }

        if !force && policy::unlock_ends_growing(txn.isolation(), mode) && txn.begin_shrinking() {
            debug!(txn = %txn_id, "transaction entered shrinking phase");
        }

        self.stats.record_unlock();
        debug!(txn = %txn_id, %mode, %resource, force, "lock released");
        Ok(true)
    }

    fn release_all(&self, txn: &Transaction) -> LockResult<()> {
        let locks = txn.lock_set();
        for (table, row, _) in locks.rows() {
            self.release(txn, Resource::Row(table, row), true)?;
        }
        for (table, _) in locks.tables() {
            self.release(txn, Resource::Table(table), true)?;
        }
        Ok(())
    }

    fn invariant_violation(&self, message: String) -> LockError {
        error!(%message, "lock table invariant violated");
        LockError::invariant_violation(message)
    }

    // === Deadlock detection ===

    fn build_graph(&self) -> WaitsForGraph {
        self.scan_waiters().0
    }

    /// Builds a wait-for graph from the current queues.
    ///
    /// Waiters whose transaction is already aborted contribute no edges.
    /// They are returned separately: an abort set without a wake-up leaves
    /// their lock call blocked until someone notifies the queue.
    fn scan_waiters(&self) -> (WaitsForGraph, BTreeSet<TransactionId>) {
        let mut edges = Vec::new();
        let mut waiters = BTreeSet::new();
        for queue in self.all_queues() {
            let state = queue.lock();
            for waiter in state.requests().filter(|r| !r.granted) {
                waiters.insert(waiter.txn_id);
                for holder in state.requests().filter(|r| r.granted) {
                    if waiter.txn_id != holder.txn_id {
                        edges.push((waiter.txn_id, holder.txn_id));
                    }
                }
            }
        }

        let aborted: BTreeSet<_> = waiters
            .into_iter()
            .filter(|waiter| self.lookup(*waiter).is_some_and(|txn| txn.is_aborted()))
            .collect();

        let mut graph = WaitsForGraph::new();
        for (waiter, holder) in edges {
            if !aborted.contains(&waiter) && self.lookup(waiter).is_some() {
                graph.add_edge(waiter, holder);
            }
        }
        (graph, aborted)
    }

    /// Aborts a deadlock victim. Returns false if it was dropped or has
    /// already committed.
    fn abort_victim(&self, victim: TransactionId) -> bool {
        let Some(txn) = self.lookup(victim) else {
            warn!(txn = %victim, "deadlock victim no longer registered");
            return false;
        };
        if !txn.abort(Some(AbortReason::Deadlock)) {
            debug!(txn = %victim, "deadlock victim already committed");
            return false;
        }
        self.stats.record_deadlock();
        warn!(txn = %victim, "aborting deadlock victim");
        true
    }

    fn run_cycle_detection(&self) -> Vec<TransactionId> {
        self.stats.record_detection_pass();
        self.transactions
            .lock()
            .retain(|_, txn| txn.strong_count() > 0);

        let mut victims = Vec::new();
        let stranded = {
            let mut graph = self.waits_for.lock();
            let (built, stranded) = self.scan_waiters();
            *graph = built;

            while let Some(victim) = graph.has_cycle() {
                graph.remove_vertex(victim);
                if !self.abort_victim(victim) {
                    continue;
                }
                victims.push(victim);
                if !self.config.resolve_all_cycles {
                    break;
                }
            }
            graph.clear();
            stranded
        };

        for txn_id in &stranded {
            debug!(txn = %txn_id, "waking aborted waiter");
            self.wake_pending(*txn_id);
        }
        for victim in &victims {
            self.wake_pending(*victim);
        }
        victims
    }
}

/// Two-phase lock manager for tables and rows.
///
/// The lock manager provides:
/// - Five lock modes with multi-granularity (table/row) locking
/// - FIFO grants per resource, with upgrades placed ahead of waiters
/// - Isolation-level dependent 2PL rules
/// - A background deadlock detector that aborts the youngest transaction
///   of each wait-for cycle
///
/// Lock calls block the calling thread until the request is granted or
/// the transaction is aborted. Synchronous protocol violations abort the
/// transaction and return [`LockError::TransactionAborted`].
///
/// # Example
///
/// ```ignore
/// let lock_manager = Arc::new(LockManager::new());
/// let txn_manager = TransactionManager::new(Arc::clone(&lock_manager));
/// lock_manager.start_deadlock_detection()?;
///
/// let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
/// lock_manager.lock_table(&txn, LockMode::IntentionExclusive, TableId::new(1))?;
/// lock_manager.lock_row(&txn, LockMode::Exclusive, TableId::new(1), RowId::new(1, 0))?;
/// txn_manager.commit(&txn)?;
/// ```
pub struct LockManager {
    shared: Arc<LockTable>,
    detector: Mutex<Option<DeadlockDetector>>,
}

impl LockManager {
    /// Creates a lock manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    /// Creates a lock manager with the given configuration.
    pub fn with_config(config: LockManagerConfig) -> Self {
        Self {
            shared: Arc::new(LockTable::new(config)),
            detector: Mutex::new(None),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LockManagerConfig {
        &self.shared.config
    }

    /// Returns the lock statistics.
    pub fn stats(&self) -> &LockStats {
        &self.shared.stats
    }

    /// Acquires or upgrades a table lock.
    ///
    /// Returns `Ok(true)` once granted (immediately if `mode` is already
    /// held) and `Ok(false)` if the transaction was aborted while waiting.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table: TableId,
    ) -> LockResult<bool> {
        self.shared.acquire(txn, mode, Resource::Table(table))
    }

    /// Releases a table lock. All row locks on the table must be released first.
    pub fn unlock_table(&self, txn: &Transaction, table: TableId) -> LockResult<bool> {
        self.shared.release(txn, Resource::Table(table), false)
    }

    /// Acquires or upgrades a row lock. Only S and X are legal on rows, and
    /// a suitable table lock must already be held.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table: TableId,
        row: RowId,
    ) -> LockResult<bool> {
        self.shared.acquire(txn, mode, Resource::Row(table, row))
    }

    /// Releases a row lock.
    ///
    /// With `force` the transaction's phase is left unchanged; abort cleanup
    /// uses this.
    pub fn unlock_row(
        &self,
        txn: &Transaction,
        table: TableId,
        row: RowId,
        force: bool,
    ) -> LockResult<bool> {
        self.shared.release(txn, Resource::Row(table, row), force)
    }

    /// Releases every lock `txn` holds, rows before tables, without
    /// changing its phase.
    pub fn release_all(&self, txn: &Transaction) -> LockResult<()> {
        self.shared.release_all(txn)
    }

    /// Aborts `txn` and wakes every queue it is waiting in, so a blocked
    /// lock call returns `Ok(false)`.
    pub fn abort_and_wake(&self, txn: &Transaction) {
        txn.abort(None);
        self.shared.wake_pending(txn.id());
    }

    /// Drops the registry entry of a finished transaction.
    pub fn forget_transaction(&self, txn_id: TransactionId) {
        self.shared.transactions.lock().remove(&txn_id);
    }

    /// Starts the background deadlock detector. Does nothing if it is
    /// already running or disabled in the configuration.
    pub fn start_deadlock_detection(&self) -> LockResult<()> {
        if !self.shared.config.enable_cycle_detection {
            info!("deadlock detection disabled by configuration");
            return Ok(());
        }
        let mut detector = self.detector.lock();
        if detector.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let interval = self.shared.config.cycle_detection_interval;
        *detector = Some(DeadlockDetector::spawn(interval, move || {
            shared.run_cycle_detection();
        })?);
        info!(?interval, "deadlock detection started");
        Ok(())
    }

    /// Stops and joins the background deadlock detector, if running.
    pub fn stop_deadlock_detection(&self) {
        let detector = self.detector.lock().take();
        if let Some(detector) = detector {
            detector.stop();
            info!("deadlock detection stopped");
        }
    }

    /// Returns true if the background detector is running.
    pub fn is_detecting(&self) -> bool {
        self.detector.lock().is_some()
    }

    /// Runs one detection pass now: rebuild the wait-for graph, abort a
    /// victim per cycle, wake the victims' queues. Waiters already aborted
    /// by other means are woken as well. Returns the victims.
    pub fn run_cycle_detection(&self) -> Vec<TransactionId> {
        self.shared.run_cycle_detection()
    }

    /// Builds a wait-for graph from the current queues without touching
    /// the stored graph or aborting anyone.
    pub fn wait_for_graph(&self) -> WaitsForGraph {
        self.shared.build_graph()
    }

    /// Adds an edge to the stored wait-for graph.
    pub fn add_edge(&self, from: TransactionId, to: TransactionId) {
        self.shared.waits_for.lock().add_edge(from, to);
    }

    /// Removes an edge from the stored wait-for graph.
    pub fn remove_edge(&self, from: TransactionId, to: TransactionId) {
        self.shared.waits_for.lock().remove_edge(from, to);
    }

    /// Returns the victim of a cycle in the stored wait-for graph, if any.
    pub fn has_cycle(&self) -> Option<TransactionId> {
        self.shared.waits_for.lock().has_cycle()
    }

    /// Returns the edges of the stored wait-for graph.
    pub fn edge_list(&self) -> Vec<(TransactionId, TransactionId)> {
        self.shared.waits_for.lock().edge_list()
    }

    /// Returns a copy of a table's queue, empty if it was never locked.
    pub fn table_queue_snapshot(&self, table: TableId) -> Vec<LockRequest> {
        self.shared
            .existing_queue(Resource::Table(table))
            .map(|queue| queue.snapshot())
            .unwrap_or_default()
    }

    /// Returns a copy of a row's queue, empty if it was never locked.
    pub fn row_queue_snapshot(&self, row: RowId) -> Vec<LockRequest> {
        self.shared
            .row_lock_map
            .lock()
            .get(&row)
            .cloned()
            .map(|queue| queue.snapshot())
            .unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_deadlock_detection();
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.shared.config)
            .field("tables", &self.shared.table_lock_map.lock().len())
            .field("rows", &self.shared.row_lock_map.lock().len())
            .field("detecting", &self.is_detecting())
            .finish()
    }
}
