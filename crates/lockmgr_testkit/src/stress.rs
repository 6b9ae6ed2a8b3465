//! Stress workloads for the lock manager.
//!
//! These workloads run many short transactions from several threads and
//! check mutual exclusion while locks are held. A violation panics the
//! worker thread, which fails the calling test on join.

use crate::fixtures::TestHarness;
use lockmgr_core::{IsolationLevel, LockError, LockMode, RowId, TableId, Transaction};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions run.
    pub total_ops: usize,
    /// Transactions that committed.
    pub successful_ops: usize,
    /// Transactions that were aborted (deadlock victims).
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Aborted: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of transactions to run across all threads.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct tables.
    pub tables: u32,
    /// Number of distinct rows per table.
    pub rows_per_table: u32,
    /// Rows locked by each transaction in the row workload.
    pub rows_per_txn: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            tables: 2,
            rows_per_table: 8,
            rows_per_txn: 2,
        }
    }
}

/// Counts holders of one resource and panics if exclusivity breaks.
#[derive(Debug, Default)]
struct HolderCount {
    readers: AtomicUsize,
    writers: AtomicUsize,
}

impl HolderCount {
    fn enter(&self, mode: LockMode) {
        if mode == LockMode::Exclusive {
            let writers = self.writers.fetch_add(1, Ordering::SeqCst);
            let readers = self.readers.load(Ordering::SeqCst);
            assert!(
                writers == 0 && readers == 0,
                "exclusive lock granted alongside {writers} writers and {readers} readers"
            );
        } else {
            self.readers.fetch_add(1, Ordering::SeqCst);
            let writers = self.writers.load(Ordering::SeqCst);
            assert_eq!(writers, 0, "shared lock granted alongside a writer");
        }
    }

    fn exit(&self, mode: LockMode) {
        if mode == LockMode::Exclusive {
            self.writers.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.readers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Runs `work` for `config.operations` transactions spread over
/// `config.threads` threads. `work` returns true if its transaction
/// committed.
fn run_workers<F>(config: &StressConfig, work: F) -> StressTestResult
where
    F: Fn(usize) -> bool + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let work = Arc::clone(&work);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    if work(t * ops_per_thread + i) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Stress worker panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Aborts `txn` through the transaction manager and reports failure.
fn give_up(harness: &TestHarness, txn: &Transaction) -> bool {
    harness.tm().abort(txn).expect("Failed to abort transaction");
    false
}

/// Commits `txn`, falling back to abort if the detector chose it as a
/// victim after its last lock was granted.
fn finish(harness: &TestHarness, txn: &Transaction) -> bool {
    match harness.tm().commit(txn) {
        Ok(()) => true,
        Err(LockError::TransactionNotActive { .. }) => give_up(harness, txn),
        Err(e) => panic!("Commit failed: {e}"),
    }
}

/// Readers and writers contend on table locks only.
///
/// Every third transaction takes X on a random table, the rest take S.
/// There are no deadlocks in this workload, so every transaction commits.
pub fn stress_table_readers_writers(
    harness: Arc<TestHarness>,
    config: &StressConfig,
) -> StressTestResult {
    let holders: Arc<Vec<HolderCount>> =
        Arc::new((0..config.tables.max(1)).map(|_| HolderCount::default()).collect());
    let tables = config.tables.max(1);

    run_workers(config, move |i| {
        let table = rand::thread_rng().gen_range(0..tables);
        let mode = if i % 3 == 0 {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let txn = harness.begin(IsolationLevel::RepeatableRead);

        if !harness
            .lm()
            .lock_table(&txn, mode, TableId::new(table))
            .expect("Table lock failed")
        {
            return give_up(&harness, &txn);
        }

        let counter = &holders[table as usize];
        counter.enter(mode);
        thread::yield_now();
        counter.exit(mode);

        finish(&harness, &txn)
    })
}

/// Transactions take IX on a table, then X on several random rows in a
/// random order.
///
/// Opposite lock orders deadlock, so the harness must have detection
/// running. Victims are aborted and counted as failed.
pub fn stress_row_writers(harness: Arc<TestHarness>, config: &StressConfig) -> StressTestResult {
    let tables = config.tables.max(1);
    let rows_per_table = config.rows_per_table.max(1);
    let rows_per_txn = config.rows_per_txn.max(1);

    let mut holders = HashMap::new();
    for table in 0..tables {
        for slot in 0..rows_per_table {
            holders.insert(RowId::new(table, slot), HolderCount::default());
        }
    }
    let holders = Arc::new(holders);

    run_workers(config, move |_| {
        let mut rng = rand::thread_rng();
        let table = rng.gen_range(0..tables);
        let mut slots: Vec<u32> = (0..rows_per_table).collect();
        slots.shuffle(&mut rng);
        slots.truncate(rows_per_txn);

        let txn = harness.begin(IsolationLevel::RepeatableRead);
        let lm = harness.lm();
        let table_id = TableId::new(table);

        if !lm
            .lock_table(&txn, LockMode::IntentionExclusive, table_id)
            .expect("Table lock failed")
        {
            return give_up(&harness, &txn);
        }

        let mut held = Vec::new();
        for slot in slots {
            let row = RowId::new(table, slot);
            match lm.lock_row(&txn, LockMode::Exclusive, table_id, row) {
                Ok(true) => {
                    holders[&row].enter(LockMode::Exclusive);
                    held.push(row);
                }
                Ok(false) | Err(LockError::TransactionNotActive { .. }) => {
                    for row in &held {
                        holders[row].exit(LockMode::Exclusive);
                    }
                    return give_up(&harness, &txn);
                }
                Err(e) => panic!("Row lock failed: {e}"),
            }
        }

        thread::yield_now();
        for row in &held {
            holders[row].exit(LockMode::Exclusive);
        }
        finish(&harness, &txn)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_readers_writers() {
        let harness = Arc::new(TestHarness::new());
        let config = StressConfig {
            operations: 400,
            threads: 4,
            tables: 2,
            ..Default::default()
        };

        let result = stress_table_readers_writers(Arc::clone(&harness), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        assert_eq!(harness.tm().active_count(), 0);
    }

    #[test]
    fn test_row_writers_with_deadlocks() {
        let harness = Arc::new(TestHarness::with_detection(Duration::from_millis(2)));
        let config = StressConfig {
            operations: 400,
            threads: 4,
            tables: 1,
            rows_per_table: 4,
            rows_per_txn: 3,
        };

        let result = stress_row_writers(Arc::clone(&harness), &config);
        assert_eq!(result.total_ops, 400);
        // Only detector aborts fail a transaction here, and a counted
        // victim never commits.
        assert_eq!(result.failed_ops as u64, harness.lm().stats().deadlocks_resolved());
        assert_eq!(harness.tm().active_count(), 0);
        assert!(harness.lm().table_queue_snapshot(TableId::new(0)).is_empty());
        for slot in 0..4 {
            assert!(harness.lm().row_queue_snapshot(RowId::new(0, slot)).is_empty());
        }
    }
}
