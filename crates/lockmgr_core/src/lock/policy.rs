//! Isolation-level and two-phase-locking rules.
//!
//! These checks are pure: they only decide. The lock manager applies the
//! abort (state change, wake-up, error) when one of them fails.

use crate::error::AbortReason;
use crate::lock::LockMode;
use crate::transaction::{IsolationLevel, TransactionState};

/// Checks whether `mode` may be requested in `state` under `isolation`.
///
/// - `RepeatableRead`: any mode while growing, nothing while shrinking.
/// - `ReadCommitted`: any mode while growing, only S and IS while shrinking.
/// - `ReadUncommitted`: only IX and X, and only while growing.
pub fn check_isolation(
    isolation: IsolationLevel,
    state: TransactionState,
    mode: LockMode,
) -> Result<(), AbortReason> {
    let growing = state == TransactionState::Growing;
    match isolation {
        IsolationLevel::RepeatableRead => {
            if !growing {
                return Err(AbortReason::LockOnShrinking);
            }
        }
        IsolationLevel::ReadCommitted => {
            if !growing && !matches!(mode, LockMode::Shared | LockMode::IntentionShared) {
                return Err(AbortReason::LockOnShrinking);
            }
        }
        IsolationLevel::ReadUncommitted => {
            if !matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive) {
                return Err(AbortReason::LockSharedOnReadUncommitted);
            }
            if !growing {
                return Err(AbortReason::LockOnShrinking);
            }
        }
    }
    Ok(())
}

/// Rejects intention modes on rows.
pub fn check_row_mode(mode: LockMode) -> Result<(), AbortReason> {
    if mode.is_intention() {
        Err(AbortReason::AttemptedIntentionLockOnRow)
    } else {
        Ok(())
    }
}

/// Checks that the table lock `held` (if any) permits a row lock in `mode`.
///
/// A shared row lock needs any table lock; an exclusive row lock needs
/// IX, X or SIX on the table.
pub fn check_table_lock_for_row(held: Option<LockMode>, mode: LockMode) -> Result<(), AbortReason> {
    let permitted = match (mode, held) {
        (_, None) => false,
        (LockMode::Shared, Some(_)) => true,
        (LockMode::Exclusive, Some(table_mode)) => matches!(
            table_mode,
            LockMode::IntentionExclusive | LockMode::Exclusive | LockMode::SharedIntentionExclusive
        ),
        _ => false,
    };
    if permitted {
        Ok(())
    } else {
        Err(AbortReason::TableLockNotPresent)
    }
}

/// Checks that `held` may be upgraded to `requested`.
pub fn check_upgrade(held: LockMode, requested: LockMode) -> Result<(), AbortReason> {
    if held.can_upgrade_to(requested) {
        Ok(())
    } else {
        Err(AbortReason::IncompatibleUpgrade)
    }
}

/// Returns true if releasing `mode` ends the growing phase under `isolation`.
///
/// Under `RepeatableRead` releasing S or X does; under the other levels only
/// releasing X does. Releasing S under `ReadUncommitted` (which can never
/// have been granted there) causes no transition.
pub fn unlock_ends_growing(isolation: IsolationLevel, mode: LockMode) -> bool {
    match isolation {
        IsolationLevel::RepeatableRead => {
            matches!(mode, LockMode::Shared | LockMode::Exclusive)
        }
        IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
            mode == LockMode::Exclusive
        }
    }
}
