//! Lock management: modes, the 2PL rules, resource queues, the lock
//! manager itself and deadlock detection.
//!
//! Locks are taken at two granularities. Tables accept all five modes;
//! rows accept only `Shared` and `Exclusive` and require a suitable table
//! lock first.

mod deadlock;
mod manager;
mod mode;
pub mod policy;
mod queue;

pub use deadlock::{DeadlockDetector, WaitsForGraph};
pub use manager::LockManager;
pub use mode::LockMode;
pub use queue::{LockRequest, LockRequestQueue, QueueState};
