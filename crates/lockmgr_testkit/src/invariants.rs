//! Invariant checks over lock queues and transaction bookkeeping.
//!
//! Each check returns a description of the first violation found, so
//! callers can use it from plain tests (`assert!(check.is_ok())`) or from
//! property tests (`prop_assert!`).

use lockmgr_core::{LockManager, LockRequest, TransactionId, Transaction, WaitsForGraph};
use std::collections::{BTreeSet, HashSet};

/// Checks the shape of a single queue snapshot.
///
/// - Granted modes of different transactions are pairwise compatible.
/// - Granted requests form a prefix of the queue.
/// - A transaction has at most one request in the queue.
pub fn check_queue(requests: &[LockRequest]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for request in requests {
        if !seen.insert(request.txn_id) {
            return Err(format!("{} queued twice", request.txn_id));
        }
    }

    if let Some(gap) = requests.iter().position(|r| !r.granted) {
        if let Some(late) = requests[gap..].iter().find(|r| r.granted) {
            return Err(format!(
                "{} granted behind waiting {}",
                late.txn_id, requests[gap].txn_id
            ));
        }
    }

    let granted: Vec<_> = requests.iter().filter(|r| r.granted).collect();
    for (i, a) in granted.iter().enumerate() {
        for b in &granted[i + 1..] {
            if !a.mode.is_compatible_with(b.mode) {
                return Err(format!(
                    "{} holds {} alongside {} holding {}",
                    a.txn_id, a.mode, b.txn_id, b.mode
                ));
            }
        }
    }
    Ok(())
}

/// Checks that every lock recorded on `txn` has a granted request of the
/// same mode in the lock manager's queues, and that every row lock is
/// covered by a table lock permitting it.
pub fn check_bookkeeping(lm: &LockManager, txn: &Transaction) -> Result<(), String> {
    let locks = txn.lock_set();

    for (table, mode) in locks.tables() {
        let queue = lm.table_queue_snapshot(table);
        if !holds(&queue, txn.id(), mode) {
            return Err(format!("{} records {mode} on {table} but queue disagrees", txn.id()));
        }
    }

    for (table, row, mode) in locks.rows() {
        let queue = lm.row_queue_snapshot(row);
        if !holds(&queue, txn.id(), mode) {
            return Err(format!("{} records {mode} on {row} but queue disagrees", txn.id()));
        }
        if lockmgr_core::lock::policy::check_table_lock_for_row(locks.table_mode(table), mode)
            .is_err()
        {
            return Err(format!("{} holds {mode} on {row} without a covering lock on {table}", txn.id()));
        }
    }
    Ok(())
}

fn holds(queue: &[LockRequest], txn_id: TransactionId, mode: lockmgr_core::LockMode) -> bool {
    queue
        .iter()
        .any(|r| r.txn_id == txn_id && r.mode == mode && r.granted)
}

/// Returns the vertices of `graph` that lie on some cycle, by brute-force
/// reachability.
pub fn vertices_on_cycles(graph: &WaitsForGraph) -> BTreeSet<TransactionId> {
    let edges = graph.edge_list();
    let vertices: BTreeSet<_> = edges.iter().flat_map(|(a, b)| [*a, *b]).collect();

    vertices
        .iter()
        .copied()
        .filter(|start| {
            let mut reached = HashSet::new();
            let mut stack = vec![*start];
            while let Some(node) = stack.pop() {
                for (_, to) in edges.iter().filter(|(from, _)| *from == node) {
                    if to == start {
                        return true;
                    }
                    if reached.insert(*to) {
                        stack.push(*to);
                    }
                }
            }
            false
        })
        .collect()
}
