//! Error types for the lock manager.

use crate::transaction::TransactionState;
use crate::types::TransactionId;
use std::fmt;
use thiserror::Error;

/// Result type for lock manager operations.
pub type LockResult<T> = Result<T, LockError>;

/// Why a transaction was aborted by the lock manager.
///
/// The reason is recorded on the transaction itself; synchronous aborts also
/// surface it through [`LockError::TransactionAborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// Lock requested while the transaction is shrinking.
    LockOnShrinking,
    /// S, IS or SIX requested under `READ_UNCOMMITTED`.
    LockSharedOnReadUncommitted,
    /// Another transaction is already upgrading on the same resource.
    UpgradeConflict,
    /// The requested mode is not reachable from the held one.
    IncompatibleUpgrade,
    /// Unlock of a resource the transaction does not hold.
    AttemptedUnlockButNoLockHeld,
    /// Table unlocked while row locks on it are still held.
    TableUnlockedBeforeUnlockingRows,
    /// IS, IX or SIX requested on a row.
    AttemptedIntentionLockOnRow,
    /// Row lock requested without a suitable lock on its table.
    TableLockNotPresent,
    /// Chosen as the victim of a wait-for cycle.
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LockOnShrinking => "lock requested in shrinking phase",
            Self::LockSharedOnReadUncommitted => "shared lock requested under read uncommitted",
            Self::UpgradeConflict => "another upgrade is in progress on this resource",
            Self::IncompatibleUpgrade => "incompatible lock upgrade",
            Self::AttemptedUnlockButNoLockHeld => "unlock attempted but no lock held",
            Self::TableUnlockedBeforeUnlockingRows => "table unlocked before its rows",
            Self::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            Self::TableLockNotPresent => "row lock requested without a table lock",
            Self::Deadlock => "chosen as deadlock victim",
        };
        f.write_str(text)
    }
}

/// Errors that can occur in lock manager operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The request violated the locking protocol and the transaction was aborted.
    #[error("{txn_id} aborted: {reason}")]
    TransactionAborted {
        /// The aborted transaction.
        txn_id: TransactionId,
        /// Reason for abort.
        reason: AbortReason,
    },

    /// The transaction already finished and cannot take part in locking.
    #[error("{txn_id} is not active (state {state:?})")]
    TransactionNotActive {
        /// The transaction.
        txn_id: TransactionId,
        /// Its current state.
        state: TransactionState,
    },

    /// Transaction is not registered with the manager.
    #[error("unknown transaction {txn_id}")]
    UnknownTransaction {
        /// The missing transaction.
        txn_id: TransactionId,
    },

    /// Internal bookkeeping no longer matches the lock table.
    ///
    /// This is not recoverable by the caller.
    #[error("lock table invariant violated: {message}")]
    InvariantViolation {
        /// Description of the violation.
        message: String,
    },

    /// The deadlock detector thread could not be spawned.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockError {
    /// Creates a transaction aborted error.
    pub fn aborted(txn_id: TransactionId, reason: AbortReason) -> Self {
        Self::TransactionAborted { txn_id, reason }
    }

    /// Creates a transaction not active error.
    pub fn not_active(txn_id: TransactionId, state: TransactionState) -> Self {
        Self::TransactionNotActive { txn_id, state }
    }

    /// Creates an invariant violation error.
    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Returns the abort reason, if this error aborted a transaction.
    #[must_use]
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::TransactionAborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
