//! Transaction manager.

use crate::error::{LockError, LockResult};
use crate::lock::LockManager;
use crate::transaction::state::{IsolationLevel, Transaction, TransactionState};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Creates transactions and finishes them against a [`LockManager`].
///
/// The transaction manager provides:
/// - Monotonically increasing transaction IDs, starting at 0
/// - Lookup of active transactions by ID
/// - Commit and abort, both of which release every held lock
///
/// Locks are held until commit or abort (strict 2PL) unless the caller
/// releases them earlier through the lock manager.
pub struct TransactionManager {
    /// Lock manager that owns the resource queues.
    lock_manager: Arc<LockManager>,
    /// Next transaction ID.
    next_txn_id: AtomicU64,
    /// Active transactions.
    active_txns: RwLock<HashMap<TransactionId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            next_txn_id: AtomicU64::new(0),
            active_txns: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the lock manager.
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begins a new transaction in the growing phase.
    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let txn_id = TransactionId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let txn = Arc::new(Transaction::new(txn_id, isolation));
        self.active_txns.write().insert(txn_id, Arc::clone(&txn));
        debug!(txn = %txn_id, ?isolation, "transaction started");
        txn
    }

    /// Returns the active transaction with the given ID.
    pub fn get(&self, txn_id: TransactionId) -> LockResult<Arc<Transaction>> {
        self.active_txns
            .read()
            .get(&txn_id)
            .cloned()
            .ok_or(LockError::UnknownTransaction { txn_id })
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }

    /// Commits a transaction, releasing all of its locks.
    ///
    /// A transaction the lock manager already aborted cannot commit; call
    /// [`abort`](Self::abort) to clean it up instead. This includes a
    /// deadlock victim aborted while its locks were being released.
    pub fn commit(&self, txn: &Transaction) -> LockResult<()> {
        let state = txn.state();
        if state.is_terminal() {
            return Err(LockError::not_active(txn.id(), state));
        }

        self.lock_manager.release_all(txn)?;
        if !txn.commit() {
            let state = txn.state();
            debug!(txn = %txn.id(), ?state, "commit lost to a concurrent abort");
            return Err(LockError::not_active(txn.id(), state));
        }
        self.finish(txn.id());
        debug!(txn = %txn.id(), "transaction committed");
        Ok(())
    }

    /// Aborts a transaction, waking it if blocked and releasing all of its
    /// locks.
    ///
    /// Transactions already aborted by the lock manager are accepted, so
    /// this is also the cleanup path for deadlock victims.
    pub fn abort(&self, txn: &Transaction) -> LockResult<()> {
        let state = txn.state();
        if state == TransactionState::Committed {
            return Err(LockError::not_active(txn.id(), state));
        }

        self.lock_manager.abort_and_wake(txn);
        self.lock_manager.release_all(txn)?;
        self.finish(txn.id());
        debug!(txn = %txn.id(), reason = ?txn.abort_reason(), "transaction aborted");
        Ok(())
    }

    fn finish(&self, txn_id: TransactionId) {
        self.active_txns.write().remove(&txn_id);
        self.lock_manager.forget_transaction(txn_id);
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::SeqCst))
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AbortReason;
    use crate::lock::LockMode;
    use crate::types::{RowId, TableId};

    fn create_manager() -> TransactionManager {
        TransactionManager::new(Arc::new(LockManager::new()))
    }

    #[test]
    fn ids_start_at_zero_and_increase() {
        let tm = create_manager();
        let t0 = tm.begin(IsolationLevel::RepeatableRead);
        let t1 = tm.begin(IsolationLevel::ReadCommitted);

        assert_eq!(t0.id(), TransactionId::new(0));
        assert_eq!(t1.id(), TransactionId::new(1));
        assert_eq!(t1.isolation(), IsolationLevel::ReadCommitted);
        assert_eq!(tm.active_count(), 2);
    }

    #[test]
    fn get_active_transaction() {
        let tm = create_manager();
        let txn = tm.begin(IsolationLevel::default());

        assert_eq!(tm.get(txn.id()).unwrap().id(), txn.id());
        assert!(matches!(
            tm.get(TransactionId::new(99)),
            Err(LockError::UnknownTransaction { .. })
        ));
    }

    #[test]
    fn commit_releases_locks() {
        let tm = create_manager();
        let lm = Arc::clone(tm.lock_manager());
        let table = TableId::new(1);
        let row = RowId::new(1, 0);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::IntentionExclusive, table).unwrap();
        lm.lock_row(&txn, LockMode::Exclusive, table, row).unwrap();

        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.lock_set().is_empty());
        assert!(lm.table_queue_snapshot(table).is_empty());
        assert!(lm.row_queue_snapshot(row).is_empty());
        assert!(tm.get(txn.id()).is_err());
    }

    #[test]
    fn cannot_commit_twice() {
        let tm = create_manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tm.commit(&txn).unwrap();

        let result = tm.commit(&txn);
        assert!(matches!(result, Err(LockError::TransactionNotActive { .. })));
    }

    #[test]
    fn cannot_abort_after_commit() {
        let tm = create_manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        tm.commit(&txn).unwrap();

        assert!(tm.abort(&txn).is_err());
    }

    #[test]
    fn commit_never_overrides_concurrent_abort() {
        let tm = create_manager();
        let lm = Arc::clone(tm.lock_manager());
        let table = TableId::new(1);

        for _ in 0..200 {
            let txn = tm.begin(IsolationLevel::RepeatableRead);
            lm.lock_table(&txn, LockMode::Exclusive, table).unwrap();

            let committed = std::thread::scope(|s| {
                s.spawn(|| txn.abort(Some(AbortReason::Deadlock)));
                tm.commit(&txn)
            });

            match committed {
                Ok(()) => {
                    assert_eq!(txn.state(), TransactionState::Committed);
                    assert!(txn.abort_reason().is_none());
                }
                Err(e) => {
                    assert!(matches!(e, LockError::TransactionNotActive { .. }));
                    assert_eq!(txn.state(), TransactionState::Aborted);
                    assert_eq!(txn.abort_reason(), Some(AbortReason::Deadlock));
                    tm.abort(&txn).unwrap();
                }
            }
            assert!(lm.table_queue_snapshot(table).is_empty());
        }
        assert_eq!(tm.active_count(), 0);
    }

    #[test]
    fn abort_cleans_up_policy_victim() {
        let tm = create_manager();
        let lm = Arc::clone(tm.lock_manager());
        let table = TableId::new(1);

        let txn = tm.begin(IsolationLevel::RepeatableRead);
        lm.lock_table(&txn, LockMode::Exclusive, table).unwrap();
        let err = lm.lock_table(&txn, LockMode::Shared, table).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IncompatibleUpgrade));

        // Aborted by the lock manager but still holding X.
        assert!(!lm.table_queue_snapshot(table).is_empty());
        assert!(tm.commit(&txn).is_err());

        tm.abort(&txn).unwrap();
        assert!(lm.table_queue_snapshot(table).is_empty());
        assert_eq!(txn.abort_reason(), Some(AbortReason::IncompatibleUpgrade));
        assert_eq!(tm.active_count(), 0);
    }
}
