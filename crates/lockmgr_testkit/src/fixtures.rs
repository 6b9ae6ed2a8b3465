//! Test fixtures and lock manager helpers.
//!
//! Provides a harness bundling a lock manager with a transaction manager,
//! plus polling helpers for tests that block transactions on other threads.

use lockmgr_core::{
    IsolationLevel, LockManager, LockManagerConfig, RowId, TableId, Transaction,
    TransactionManager,
};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// How long polling helpers wait before failing the test.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

static LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Safe to call
/// from every test; only the first call installs anything.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A lock manager and transaction manager pair.
pub struct TestHarness {
    lock_manager: Arc<LockManager>,
    txn_manager: TransactionManager,
}

impl TestHarness {
    /// Creates a harness with default configuration and no running detector.
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    /// Creates a harness with the given configuration.
    pub fn with_config(config: LockManagerConfig) -> Self {
        init_test_logging();
        let lock_manager = Arc::new(LockManager::with_config(config));
        let txn_manager = TransactionManager::new(Arc::clone(&lock_manager));
        Self {
            lock_manager,
            txn_manager,
        }
    }

    /// Creates a harness whose background detector runs every `interval`.
    pub fn with_detection(interval: Duration) -> Self {
        let harness =
            Self::with_config(LockManagerConfig::new().cycle_detection_interval(interval));
        harness
            .lock_manager
            .start_deadlock_detection()
            .expect("Failed to start deadlock detection");
        harness
    }

    /// Returns the lock manager.
    pub fn lm(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Returns a shared handle to the lock manager.
    pub fn lock_manager(&self) -> Arc<LockManager> {
        Arc::clone(&self.lock_manager)
    }

    /// Returns the transaction manager.
    pub fn tm(&self) -> &TransactionManager {
        &self.txn_manager
    }

    /// Begins a transaction.
    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        self.txn_manager.begin(isolation)
    }

    /// Returns true if `txn` has an ungranted request on `table`.
    pub fn is_waiting_on_table(&self, txn: &Transaction, table: TableId) -> bool {
        self.lock_manager
            .table_queue_snapshot(table)
            .iter()
            .any(|r| r.txn_id == txn.id() && !r.granted)
    }

    /// Returns true if `txn` has an ungranted request on `row`.
    pub fn is_waiting_on_row(&self, txn: &Transaction, row: RowId) -> bool {
        self.lock_manager
            .row_queue_snapshot(row)
            .iter()
            .any(|r| r.txn_id == txn.id() && !r.granted)
    }

    /// Blocks until `txn` is queued but not granted on `table`.
    pub fn wait_for_table_waiter(&self, txn: &Transaction, table: TableId) {
        wait_until(|| self.is_waiting_on_table(txn, table));
    }

    /// Blocks until `txn` is queued but not granted on `row`.
    pub fn wait_for_row_waiter(&self, txn: &Transaction, row: RowId) {
        wait_until(|| self.is_waiting_on_row(txn, row));
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds, panicking after [`DEFAULT_WAIT_TIMEOUT`].
pub fn wait_until<F>(condition: F)
where
    F: FnMut() -> bool,
{
    wait_until_timeout(DEFAULT_WAIT_TIMEOUT, condition);
}

/// Polls `condition` until it holds, panicking after `timeout`.
pub fn wait_until_timeout<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "Condition not reached within {timeout:?}"
        );
        thread::sleep(Duration::from_millis(1));
    }
}
