//! Transaction handle and its lock bookkeeping.

use crate::error::AbortReason;
use crate::lock::LockMode;
use crate::types::{RowId, TableId, TransactionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// All locks held until commit; no lock may be taken once shrinking.
    #[default]
    RepeatableRead,
    /// Shared locks may still be taken while shrinking.
    ReadCommitted,
    /// Only IX and X are ever taken.
    ReadUncommitted,
}

/// Two-phase locking state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Acquiring locks.
    Growing,
    /// Has released a lock that ends the growing phase.
    Shrinking,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true for `Committed` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

#[derive(Debug)]
struct Status {
    state: TransactionState,
    abort_reason: Option<AbortReason>,
}

/// The locks a transaction currently holds, one set per mode.
///
/// This is the single source of truth for "does T hold M on R"; the lock
/// manager keeps it equal to the granted requests in the resource queues.
#[derive(Debug, Default, Clone)]
pub struct LockSet {
    shared_tables: HashSet<TableId>,
    exclusive_tables: HashSet<TableId>,
    intention_shared_tables: HashSet<TableId>,
    intention_exclusive_tables: HashSet<TableId>,
    shared_intention_exclusive_tables: HashSet<TableId>,
    shared_rows: HashMap<TableId, HashSet<RowId>>,
    exclusive_rows: HashMap<TableId, HashSet<RowId>>,
}

impl LockSet {
    fn table_set(&self, mode: LockMode) -> &HashSet<TableId> {
        match mode {
            LockMode::Shared => &self.shared_tables,
            LockMode::Exclusive => &self.exclusive_tables,
            LockMode::IntentionShared => &self.intention_shared_tables,
            LockMode::IntentionExclusive => &self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_tables,
        }
    }

    fn table_set_mut(&mut self, mode: LockMode) -> &mut HashSet<TableId> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }

    fn row_map(&self, mode: LockMode) -> Option<&HashMap<TableId, HashSet<RowId>>> {
        match mode {
            LockMode::Shared => Some(&self.shared_rows),
            LockMode::Exclusive => Some(&self.exclusive_rows),
            _ => None,
        }
    }

    fn row_map_mut(&mut self, mode: LockMode) -> Option<&mut HashMap<TableId, HashSet<RowId>>> {
        match mode {
            LockMode::Shared => Some(&mut self.shared_rows),
            LockMode::Exclusive => Some(&mut self.exclusive_rows),
            _ => None,
        }
    }

    /// Returns the mode held on `table`, if any.
    #[must_use]
    pub fn table_mode(&self, table: TableId) -> Option<LockMode> {
        LockMode::ALL
            .into_iter()
            .find(|mode| self.table_set(*mode).contains(&table))
    }

    /// Returns the mode held on `row`, if any.
    #[must_use]
    pub fn row_mode(&self, table: TableId, row: RowId) -> Option<LockMode> {
        [LockMode::Shared, LockMode::Exclusive]
            .into_iter()
            .find(|mode| {
                self.row_map(*mode)
                    .and_then(|rows| rows.get(&table))
                    .is_some_and(|set| set.contains(&row))
            })
    }

    /// Returns true if any row of `table` is locked.
    #[must_use]
    pub fn has_rows_on(&self, table: TableId) -> bool {
        let non_empty = |rows: &HashMap<TableId, HashSet<RowId>>| {
            rows.get(&table).is_some_and(|set| !set.is_empty())
        };
        non_empty(&self.shared_rows) || non_empty(&self.exclusive_rows)
    }

    /// Returns every locked table with its mode.
    #[must_use]
    pub fn tables(&self) -> Vec<(TableId, LockMode)> {
        LockMode::ALL
            .into_iter()
            .flat_map(|mode| self.table_set(mode).iter().map(move |t| (*t, mode)))
            .collect()
    }

    /// Returns every locked row with its table and mode.
    #[must_use]
    pub fn rows(&self) -> Vec<(TableId, RowId, LockMode)> {
        [LockMode::Shared, LockMode::Exclusive]
            .into_iter()
            .flat_map(|mode| {
                self.row_map(mode)
                    .into_iter()
                    .flat_map(move |rows| {
                        rows.iter().flat_map(move |(table, set)| {
                            set.iter().map(move |row| (*table, *row, mode))
                        })
                    })
            })
            .collect()
    }

    /// Returns the total number of locks held.
    #[must_use]
    pub fn len(&self) -> usize {
        let tables: usize = LockMode::ALL.iter().map(|m| self.table_set(*m).len()).sum();
        let rows: usize = self
            .shared_rows
            .values()
            .chain(self.exclusive_rows.values())
            .map(HashSet::len)
            .sum();
        tables + rows
    }

    /// Returns true if no locks are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn insert_table(&mut self, table: TableId, mode: LockMode) {
        self.table_set_mut(mode).insert(table);
    }

    pub(crate) fn remove_table(&mut self, table: TableId, mode: LockMode) -> bool {
        self.table_set_mut(mode).remove(&table)
    }

    pub(crate) fn insert_row(&mut self, table: TableId, row: RowId, mode: LockMode) {
        debug_assert!(!mode.is_intention(), "intention mode on row");
        if let Some(rows) = self.row_map_mut(mode) {
            rows.entry(table).or_default().insert(row);
        }
    }

    pub(crate) fn remove_row(&mut self, table: TableId, row: RowId, mode: LockMode) -> bool {
        let Some(rows) = self.row_map_mut(mode) else {
            return false;
        };
        let Some(set) = rows.get_mut(&table) else {
            return false;
        };
        let removed = set.remove(&row);
        if set.is_empty() {
            rows.remove(&table);
        }
        removed
    }
}

/// A transaction as seen by the lock manager.
///
/// Shared between the executing thread and the deadlock detector as
/// `Arc<Transaction>`. The state and the lock bookkeeping are guarded by
/// separate mutexes; a resource queue's mutex may be held while taking
/// either, never the reverse.
#[derive(Debug)]
pub struct Transaction {
    /// Transaction ID.
    id: TransactionId,
    /// Isolation level, fixed at creation.
    isolation: IsolationLevel,
    /// Phase plus the reason of the last abort.
    status: Mutex<Status>,
    /// Locks currently held.
    locks: Mutex<LockSet>,
}

impl Transaction {
    /// Creates a new transaction in the growing phase.
    pub fn new(id: TransactionId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            status: Mutex::new(Status {
                state: TransactionState::Growing,
                abort_reason: None,
            }),
            locks: Mutex::new(LockSet::default()),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the isolation level.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.status.lock().state
    }

    /// Returns why the lock manager aborted this transaction, if it did.
    #[must_use]
    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.status.lock().abort_reason
    }

    /// Checks if the transaction has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state() == TransactionState::Aborted
    }

    /// Sets the state directly.
    ///
    /// A lock call blocked when this sets `Aborted` returns at the next
    /// deadlock detection pass. [`LockManager::abort_and_wake`] wakes it
    /// immediately.
    ///
    /// [`LockManager::abort_and_wake`]: crate::LockManager::abort_and_wake
    pub fn set_state(&self, state: TransactionState) {
        self.status.lock().state = state;
    }

    /// Marks the transaction aborted, recording `reason` when given.
    ///
    /// A committed transaction stays committed and `false` is returned.
    pub(crate) fn abort(&self, reason: Option<AbortReason>) -> bool {
        let mut status = self.status.lock();
        if status.state == TransactionState::Committed {
            return false;
        }
        status.state = TransactionState::Aborted;
        if reason.is_some() {
            status.abort_reason = reason;
        }
        true
    }

    /// Moves a growing or shrinking transaction to committed.
    ///
    /// Returns false, leaving the state alone, if the transaction already
    /// finished; an abort that lands first wins.
    pub(crate) fn commit(&self) -> bool {
        let mut status = self.status.lock();
        if status.state.is_terminal() {
            return false;
        }
        status.state = TransactionState::Committed;
        true
    }

    /// Moves a growing transaction to shrinking. Other states are left alone.
    pub(crate) fn begin_shrinking(&self) -> bool {
        let mut status = self.status.lock();
        if status.state == TransactionState::Growing {
            status.state = TransactionState::Shrinking;
            true
        } else {
            false
        }
    }

    /// Runs `f` with the lock bookkeeping held.
    pub(crate) fn with_locks<R>(&self, f: impl FnOnce(&mut LockSet) -> R) -> R {
        f(&mut self.locks.lock())
    }

    /// Returns a copy of the current lock bookkeeping.
    #[must_use]
    pub fn lock_set(&self) -> LockSet {
        self.locks.lock().clone()
    }

    /// Returns the mode held on `table`, if any.
    #[must_use]
    pub fn table_lock_mode(&self, table: TableId) -> Option<LockMode> {
        self.locks.lock().table_mode(table)
    }

    /// Returns the mode held on `row`, if any.
    #[must_use]
    pub fn row_lock_mode(&self, table: TableId, row: RowId) -> Option<LockMode> {
        self.locks.lock().row_mode(table, row)
    }

    /// Returns true if `table` is held in exactly `mode`.
    #[must_use]
    pub fn is_table_locked(&self, table: TableId, mode: LockMode) -> bool {
        self.table_lock_mode(table) == Some(mode)
    }

    /// Returns true if `row` is held in shared mode.
    #[must_use]
    pub fn is_row_shared_locked(&self, table: TableId, row: RowId) -> bool {
        self.row_lock_mode(table, row) == Some(LockMode::Shared)
    }

    /// Returns true if `row` is held in exclusive mode.
    #[must_use]
    pub fn is_row_exclusive_locked(&self, table: TableId, row: RowId) -> bool {
        self.row_lock_mode(table, row) == Some(LockMode::Exclusive)
    }

    /// Returns true if any row of `table` is locked.
    #[must_use]
    pub fn holds_row_locks_on(&self, table: TableId) -> bool {
        self.locks.lock().has_rows_on(table)
    }

    /// Returns the tables held in `mode`.
    #[must_use]
    pub fn table_lock_set(&self, mode: LockMode) -> HashSet<TableId> {
        self.locks.lock().table_set(mode).clone()
    }

    /// Returns the rows held in `mode`, grouped by table.
    ///
    /// Intention modes never apply to rows and yield an empty map.
    #[must_use]
    pub fn row_lock_set(&self, mode: LockMode) -> HashMap<TableId, HashSet<RowId>> {
        self.locks
            .lock()
            .row_map(mode)
            .cloned()
            .unwrap_or_default()
    }
}
