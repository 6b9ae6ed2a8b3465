//! End-to-end locking scenarios against a real lock manager.

use lockmgr_testkit::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TABLE: TableId = TableId(5);

fn row(slot: u32) -> RowId {
    RowId::new(5, slot)
}

#[test]
fn exclusive_table_lock_is_handed_over_on_unlock() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);
    let t2 = harness.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE).unwrap());

    thread::scope(|s| {
        let waiter = s.spawn(|| lm.lock_table(&t2, LockMode::Exclusive, TABLE));
        harness.wait_for_table_waiter(&t2, TABLE);

        lm.unlock_table(&t1, TABLE).unwrap();
        assert!(waiter.join().unwrap().unwrap());
    });

    assert!(t2.table_lock_set(LockMode::Exclusive).contains(&TABLE));
    assert!(check_bookkeeping(lm, &t2).is_ok());
}

#[test]
fn shared_table_lock_upgrades_to_exclusive() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::Shared, TABLE).unwrap();
    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE).unwrap());

    assert!(!t1.table_lock_set(LockMode::Shared).contains(&TABLE));
    assert!(t1.table_lock_set(LockMode::Exclusive).contains(&TABLE));
    assert_eq!(lm.table_queue_snapshot(TABLE).len(), 1);
    assert!(check_queue(&lm.table_queue_snapshot(TABLE)).is_ok());
}

#[test]
fn intention_shared_upgrades_to_shared() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::IntentionShared, TABLE).unwrap();
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE).unwrap());
    assert!(t1.is_table_locked(TABLE, LockMode::Shared));
    assert_eq!(t1.state(), TransactionState::Growing);
}

#[test]
fn single_wait_edge_is_not_a_deadlock() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);
    let t2 = harness.begin(IsolationLevel::RepeatableRead);

    lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE).unwrap();
    lm.lock_row(&t1, LockMode::Exclusive, TABLE, row(0)).unwrap();
    lm.lock_table(&t2, LockMode::IntentionShared, TABLE).unwrap();

    thread::scope(|s| {
        let reader = s.spawn(|| lm.lock_row(&t2, LockMode::Shared, TABLE, row(0)));
        harness.wait_for_row_waiter(&t2, row(0));

        assert_eq!(lm.wait_for_graph().edge_list(), vec![(t2.id(), t1.id())]);
        assert!(lm.run_cycle_detection().is_empty());
        assert!(!t2.is_aborted());

        lm.unlock_row(&t1, TABLE, row(0), false).unwrap();
        assert!(reader.join().unwrap().unwrap());
    });

    assert!(t2.is_row_shared_locked(TABLE, row(0)));
}

#[test]
fn row_deadlock_aborts_younger_transaction() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);
    let t2 = harness.begin(IsolationLevel::RepeatableRead);

    for txn in [&t1, &t2] {
        lm.lock_table(txn, LockMode::IntentionExclusive, TABLE).unwrap();
    }
    lm.lock_row(&t1, LockMode::Exclusive, TABLE, row(0)).unwrap();
    lm.lock_row(&t2, LockMode::Exclusive, TABLE, row(1)).unwrap();

    thread::scope(|s| {
        let first = s.spawn(|| lm.lock_row(&t1, LockMode::Exclusive, TABLE, row(1)));
        let second = s.spawn(|| {
            let granted = lm.lock_row(&t2, LockMode::Exclusive, TABLE, row(0)).unwrap();
            if !granted {
                harness.tm().abort(&t2).unwrap();
            }
            granted
        });
        harness.wait_for_row_waiter(&t1, row(1));
        harness.wait_for_row_waiter(&t2, row(0));

        let victim = t1.id().max(t2.id());
        assert_eq!(lm.run_cycle_detection(), vec![victim]);

        assert!(!second.join().unwrap());
        assert!(first.join().unwrap().unwrap());
    });

    assert_eq!(t2.state(), TransactionState::Aborted);
    assert_eq!(t2.abort_reason(), Some(AbortReason::Deadlock));
    assert_eq!(t1.state(), TransactionState::Growing);
    assert!(t1.is_row_exclusive_locked(TABLE, row(1)));
    assert!(check_bookkeeping(lm, &t1).is_ok());
}

#[test]
fn background_detector_resolves_row_deadlock() {
    let harness = TestHarness::with_detection(Duration::from_millis(5));
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);
    let t2 = harness.begin(IsolationLevel::RepeatableRead);

    for txn in [&t1, &t2] {
        lm.lock_table(txn, LockMode::IntentionExclusive, TABLE).unwrap();
    }
    lm.lock_row(&t1, LockMode::Exclusive, TABLE, row(0)).unwrap();
    lm.lock_row(&t2, LockMode::Exclusive, TABLE, row(1)).unwrap();

    let run = |txn: &Arc<Transaction>, target: RowId| {
        let granted = lm.lock_row(txn, LockMode::Exclusive, TABLE, target).unwrap();
        if granted {
            harness.tm().commit(txn).unwrap();
        } else {
            harness.tm().abort(txn).unwrap();
        }
        granted
    };

    thread::scope(|s| {
        let first = s.spawn(|| run(&t1, row(1)));
        let second = s.spawn(|| run(&t2, row(0)));
        assert!(first.join().unwrap());
        assert!(!second.join().unwrap());
    });

    assert_eq!(t1.state(), TransactionState::Committed);
    assert_eq!(t2.abort_reason(), Some(AbortReason::Deadlock));
    assert!(lm.row_queue_snapshot(row(0)).is_empty());
    assert!(lm.row_queue_snapshot(row(1)).is_empty());
}

#[test]
fn intention_lock_on_row_aborts() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let txn = harness.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&txn, LockMode::IntentionShared, TABLE).unwrap();

    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, TABLE, row(0))
        .unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::AttemptedIntentionLockOnRow));
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn concurrent_upgrades_conflict() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);
    let t2 = harness.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Shared, TABLE).unwrap();
    lm.lock_table(&t2, LockMode::Shared, TABLE).unwrap();

    thread::scope(|s| {
        let upgrader = s.spawn(|| lm.lock_table(&t1, LockMode::SharedIntentionExclusive, TABLE));
        harness.wait_for_table_waiter(&t1, TABLE);

        let err = lm.lock_table(&t2, LockMode::Exclusive, TABLE).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));

        harness.tm().abort(&t2).unwrap();
        assert!(upgrader.join().unwrap().unwrap());
    });

    assert!(t1.is_table_locked(TABLE, LockMode::SharedIntentionExclusive));
}

#[test]
fn aborted_waiter_returns_promptly() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let t1 = harness.begin(IsolationLevel::RepeatableRead);
    let t2 = harness.begin(IsolationLevel::RepeatableRead);
    let t3 = harness.begin(IsolationLevel::RepeatableRead);
    lm.lock_table(&t1, LockMode::Exclusive, TABLE).unwrap();

    thread::scope(|s| {
        let aborted = s.spawn(|| lm.lock_table(&t2, LockMode::Shared, TABLE));
        harness.wait_for_table_waiter(&t2, TABLE);
        let behind = s.spawn(|| lm.lock_table(&t3, LockMode::Shared, TABLE));
        harness.wait_for_table_waiter(&t3, TABLE);

        harness.tm().abort(&t2).unwrap();
        assert!(!aborted.join().unwrap().unwrap());

        // The aborted request no longer blocks the queue.
        harness.tm().commit(&t1).unwrap();
        assert!(behind.join().unwrap().unwrap());
    });

    let queue = lm.table_queue_snapshot(TABLE);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].txn_id, t3.id());
}

#[test]
fn read_uncommitted_shrinks_only_on_exclusive_release() {
    let harness = TestHarness::new();
    let lm = harness.lm();
    let txn = harness.begin(IsolationLevel::ReadUncommitted);

    lm.lock_table(&txn, LockMode::IntentionExclusive, TABLE).unwrap();
    lm.unlock_table(&txn, TABLE).unwrap();
    assert_eq!(txn.state(), TransactionState::Growing);

    lm.lock_table(&txn, LockMode::Exclusive, TABLE).unwrap();
    lm.unlock_table(&txn, TABLE).unwrap();
    assert_eq!(txn.state(), TransactionState::Shrinking);
}
