//! # Lock Manager Core
//!
//! Two-phase lock manager for a relational storage engine.
//!
//! This crate provides:
//! - Five lock modes (S, X, IS, IX, SIX) over tables and rows
//! - Isolation-level aware 2PL rules (repeatable read, read committed,
//!   read uncommitted)
//! - Per-resource FIFO request queues with upgrade priority
//! - Background deadlock detection over a wait-for graph
//! - A transaction manager that releases locks on commit and abort

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod lock;
pub mod stats;
pub mod transaction;
pub mod types;

pub use config::LockManagerConfig;
pub use error::{AbortReason, LockError, LockResult};
pub use lock::{LockManager, LockMode, LockRequest, WaitsForGraph};
pub use stats::{LockStats, LockStatsSnapshot};
pub use transaction::{IsolationLevel, LockSet, Transaction, TransactionManager, TransactionState};
pub use types::{RowId, TableId, TransactionId};
