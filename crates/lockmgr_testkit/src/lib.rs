//! # Lock Manager Testkit
//!
//! Test utilities for the lock manager.
//!
//! This crate provides:
//! - A test harness bundling a lock manager and transaction manager
//! - Property-based test generators using proptest
//! - Queue and bookkeeping invariant checks
//! - Concurrent stress workloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lockmgr_testkit::prelude::*;
//!
//! #[test]
//! fn exclusive_table_lock() {
//!     let harness = TestHarness::new();
//!     let txn = harness.begin(IsolationLevel::RepeatableRead);
//!     assert!(harness.lm().lock_table(&txn, LockMode::Exclusive, TableId::new(5)).unwrap());
//!     harness.tm().commit(&txn).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod invariants;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::invariants::*;
    pub use crate::stress::*;
    pub use lockmgr_core::{
        AbortReason, IsolationLevel, LockError, LockManager, LockManagerConfig, LockMode,
        RowId, TableId, Transaction, TransactionId, TransactionManager, TransactionState,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use invariants::*;
pub use stress::*;
