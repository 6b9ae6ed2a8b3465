//! Lock modes, their compatibility matrix and legal upgrade paths.

use std::fmt;

/// Lock modes for multi-granularity locking.
///
/// Intention modes are only legal on tables; rows take `Shared` or
/// `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read access to the whole resource.
    Shared,
    /// Write access to the whole resource.
    Exclusive,
    /// Intent to take shared locks on rows of the table.
    IntentionShared,
    /// Intent to take exclusive locks on rows of the table.
    IntentionExclusive,
    /// Shared on the table plus intent to take exclusive row locks.
    SharedIntentionExclusive,
}

impl LockMode {
    /// Every lock mode, in declaration order.
    pub const ALL: [LockMode; 5] = [
        LockMode::Shared,
        LockMode::Exclusive,
        LockMode::IntentionShared,
        LockMode::IntentionExclusive,
        LockMode::SharedIntentionExclusive,
    ];

    /// Returns true if a lock in `self` can be granted while `other` is held
    /// by a different transaction. The relation is symmetric.
    #[must_use]
    pub const fn is_compatible_with(self, other: LockMode) -> bool {
        use LockMode::{
            Exclusive, IntentionExclusive, IntentionShared, Shared, SharedIntentionExclusive,
        };
        match (self, other) {
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) | (Shared, Shared) => true,
            (IntentionExclusive, _)
            | (Shared, _)
            | (SharedIntentionExclusive, _) => false,
        }
    }

    /// Returns true if a transaction holding `self` may upgrade to `target`.
    ///
    /// Legal paths: IS -> {S, X, IX, SIX}, S -> {X, SIX}, IX -> {X, SIX},
    /// SIX -> {X}.
    #[must_use]
    pub const fn can_upgrade_to(self, target: LockMode) -> bool {
        use LockMode::{
            Exclusive, IntentionExclusive, IntentionShared, Shared, SharedIntentionExclusive,
        };
        matches!(
            (self, target),
            (
                IntentionShared,
                Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
            ) | (Shared | IntentionExclusive, Exclusive | SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }

    /// Returns true for IS, IX and SIX.
    #[must_use]
    pub const fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }

    /// Returns true if `self` is compatible with every mode in `held`.
    pub fn is_compatible_with_all<'a, I>(self, held: I) -> bool
    where
        I: IntoIterator<Item = &'a LockMode>,
    {
        held.into_iter().all(|m| self.is_compatible_with(*m))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self {
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::SharedIntentionExclusive => "SIX",
        };
        f.write_str(short)
    }
}
