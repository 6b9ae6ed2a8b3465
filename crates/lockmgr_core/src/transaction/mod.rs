//! Transactions as seen by the lock manager.
//!
//! A [`Transaction`] carries its isolation level, its two-phase-locking
//! state and the locks it holds. The [`TransactionManager`] hands out IDs
//! and ties commit and abort to lock release.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{IsolationLevel, LockSet, Transaction, TransactionState};
