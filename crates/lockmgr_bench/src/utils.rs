//! Benchmark utilities.

use lockmgr_core::{
    IsolationLevel, LockManager, LockMode, RowId, TableId, Transaction, TransactionId,
    WaitsForGraph,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;

/// Creates a repeatable-read transaction with the given ID.
pub fn transaction(id: u64) -> Arc<Transaction> {
    Arc::new(Transaction::new(
        TransactionId::new(id),
        IsolationLevel::RepeatableRead,
    ))
}

/// Generate `count` row IDs on `table`, shuffled.
pub fn shuffled_rows(table: TableId, count: u32) -> Vec<RowId> {
    let mut rows: Vec<_> = (0..count).map(|slot| RowId::new(table.as_u32(), slot)).collect();
    rows.shuffle(&mut rand::thread_rng());
    rows
}

/// Locks `rows` exclusively under an IX lock on `table`, then releases
/// everything.
pub fn lock_rows_and_release(lm: &LockManager, txn: &Arc<Transaction>, table: TableId, rows: &[RowId]) {
    lm.lock_table(txn, LockMode::IntentionExclusive, table)
        .expect("Table lock failed");
    for row in rows {
        lm.lock_row(txn, LockMode::Exclusive, table, *row)
            .expect("Row lock failed");
    }
    lm.release_all(txn).expect("Release failed");
}

/// Generate a random wait-for graph with `vertices` transactions and
/// roughly `edges` edges, without self-edges.
pub fn random_graph(vertices: u64, edges: usize) -> WaitsForGraph {
    let mut rng = rand::thread_rng();
    let mut graph = WaitsForGraph::new();
    for _ in 0..edges {
        let from = rng.gen_range(0..vertices);
        let to = rng.gen_range(0..vertices);
        if from != to {
            graph.add_edge(TransactionId::new(from), TransactionId::new(to));
        }
    }
    graph
}

/// Generate a single cycle through `vertices` transactions.
pub fn ring_graph(vertices: u64) -> WaitsForGraph {
    let mut graph = WaitsForGraph::new();
    for id in 0..vertices {
        graph.add_edge(TransactionId::new(id), TransactionId::new((id + 1) % vertices));
    }
    graph
}
