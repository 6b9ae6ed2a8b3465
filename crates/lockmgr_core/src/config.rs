//! Lock manager configuration.

use std::time::Duration;

/// Configuration for a [`LockManager`](crate::LockManager).
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// How long the deadlock detector sleeps between passes.
    pub cycle_detection_interval: Duration,

    /// Whether `start_deadlock_detection` spawns the background detector.
    pub enable_cycle_detection: bool,

    /// Whether one detection pass keeps aborting victims until the wait-for
    /// graph is acyclic. When false, at most one victim is chosen per pass.
    pub resolve_all_cycles: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
            enable_cycle_detection: true,
            resolve_all_cycles: true,
        }
    }
}

impl LockManagerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the detector polling interval.
    #[must_use]
    pub const fn cycle_detection_interval(mut self, interval: Duration) -> Self {
        self.cycle_detection_interval = interval;
        self
    }

    /// Sets whether the background detector may be started.
    #[must_use]
    pub const fn enable_cycle_detection(mut self, value: bool) -> Self {
        self.enable_cycle_detection = value;
        self
    }

    /// Sets whether a pass resolves every cycle or only the first one found.
    #[must_use]
    pub const fn resolve_all_cycles(mut self, value: bool) -> Self {
        self.resolve_all_cycles = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LockManagerConfig::default();
        assert_eq!(config.cycle_detection_interval, Duration::from_millis(50));
        assert!(config.enable_cycle_detection);
        assert!(config.resolve_all_cycles);
    }

    #[test]
    fn builder_pattern() {
        let config = LockManagerConfig::new()
            .cycle_detection_interval(Duration::from_millis(5))
            .enable_cycle_detection(false)
            .resolve_all_cycles(false);

        assert_eq!(config.cycle_detection_interval, Duration::from_millis(5));
        assert!(!config.enable_cycle_detection);
        assert!(!config.resolve_all_cycles);
    }
}
