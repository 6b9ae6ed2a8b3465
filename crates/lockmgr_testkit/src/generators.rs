//! Property-based test generators using proptest.
//!
//! Provides strategies for lock modes, resources, request queues and
//! wait-for graphs.

use lockmgr_core::lock::QueueState;
use lockmgr_core::{
    IsolationLevel, LockMode, LockRequest, RowId, TableId, TransactionId, WaitsForGraph,
};
use proptest::prelude::*;

/// Strategy for generating any lock mode.
pub fn lock_mode_strategy() -> impl Strategy<Value = LockMode> {
    prop::sample::select(LockMode::ALL.to_vec())
}

/// Strategy for generating lock modes legal on rows.
pub fn row_mode_strategy() -> impl Strategy<Value = LockMode> {
    prop_oneof![Just(LockMode::Shared), Just(LockMode::Exclusive)]
}

/// Strategy for generating isolation levels.
pub fn isolation_strategy() -> impl Strategy<Value = IsolationLevel> {
    prop_oneof![
        Just(IsolationLevel::RepeatableRead),
        Just(IsolationLevel::ReadCommitted),
        Just(IsolationLevel::ReadUncommitted),
    ]
}

/// Strategy for generating table IDs from a small domain, so generated
/// workloads actually contend.
pub fn table_id_strategy(tables: u32) -> impl Strategy<Value = TableId> {
    (0..tables.max(1)).prop_map(TableId::new)
}

/// Strategy for generating row IDs on a small number of pages and slots.
pub fn row_id_strategy(pages: u32, slots: u32) -> impl Strategy<Value = RowId> {
    (0..pages.max(1), 0..slots.max(1)).prop_map(|(page, slot)| RowId::new(page, slot))
}

/// Strategy for generating a request queue in arrival order.
///
/// Every request belongs to a distinct transaction, as in a real queue.
/// No request is granted yet.
pub fn request_queue_strategy(max_len: usize) -> impl Strategy<Value = Vec<LockRequest>> {
    prop::collection::vec(lock_mode_strategy(), 0..max_len).prop_map(|modes| {
        modes
            .into_iter()
            .enumerate()
            .map(|(i, mode)| LockRequest::table(TransactionId::new(i as u64), mode, TableId::new(0)))
            .collect()
    })
}

/// Builds a queue state holding `requests` in order.
pub fn queue_from(requests: Vec<LockRequest>) -> QueueState {
    let mut state = QueueState::default();
    for request in requests {
        state.push_back(request);
    }
    state
}

/// Strategy for generating a wait-for graph over `vertices` transactions.
pub fn waits_for_graph_strategy(vertices: u64, max_edges: usize) -> impl Strategy<Value = WaitsForGraph> {
    let vertices = vertices.max(2);
    prop::collection::vec((0..vertices, 0..vertices), 0..max_edges).prop_map(|edges| {
        let mut graph = WaitsForGraph::new();
        for (from, to) in edges {
            if from != to {
                graph.add_edge(TransactionId::new(from), TransactionId::new(to));
            }
        }
        graph
    })
}

/// A single step of a generated locking workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOperation {
    /// Lock a table
    LockTable {
        /// Table
        table: TableId,
        /// Requested mode
        mode: LockMode,
    },
    /// Lock a row
    LockRow {
        /// Table the row belongs to
        table: TableId,
        /// Row
        row: RowId,
        /// Requested mode
        mode: LockMode,
    },
    /// Unlock a table
    UnlockTable {
        /// Table
        table: TableId,
    },
    /// Unlock a row
    UnlockRow {
        /// Table the row belongs to
        table: TableId,
        /// Row
        row: RowId,
    },
}

/// A row together with the table it belongs to. The row's page is the
/// table ID so rows never straddle tables.
fn table_row_strategy(tables: u32) -> impl Strategy<Value = (TableId, RowId)> {
    (table_id_strategy(tables), 0..4u32)
        .prop_map(|(table, slot)| (table, RowId::new(table.as_u32(), slot)))
}

/// Strategy for generating lock operations on tables `0..tables`.
pub fn lock_operation_strategy(tables: u32) -> impl Strategy<Value = LockOperation> {
    prop_oneof![
        3 => (table_id_strategy(tables), lock_mode_strategy())
            .prop_map(|(table, mode)| LockOperation::LockTable { table, mode }),
        3 => (table_row_strategy(tables), row_mode_strategy())
            .prop_map(|((table, row), mode)| LockOperation::LockRow { table, row, mode }),
        1 => table_id_strategy(tables).prop_map(|table| LockOperation::UnlockTable { table }),
        1 => table_row_strategy(tables).prop_map(|(table, row)| LockOperation::UnlockRow { table, row }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    tables: u32,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LockOperation>> {
    prop::collection::vec(lock_operation_strategy(tables), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
