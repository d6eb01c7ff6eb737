//! # Supervisor configuration.
//!
//! Timing of the reconciliation loop and the listen address.
//!
//! ## Sentinel values
//! - `stagger = 0s` → every scheduled operation of a tick runs at once

use std::time::Duration;

/// Settings for one supervisor.
///
/// ## Field semantics
/// - `listen`: address the services dial
/// - `reconcile_grace`: delay before the first periodic reconciliation
/// - `reconcile_period`: interval between reconciliations
/// - `stagger`: spacing between the operations scheduled by one reconciliation
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub listen: String,
    pub reconcile_grace: Duration,
    pub reconcile_period: Duration,
    pub stagger: Duration,
}

impl SupervisorConfig {
    pub fn with_listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    pub fn with_reconcile_grace(mut self, grace: Duration) -> Self {
        self.reconcile_grace = grace;
        self
    }

    pub fn with_reconcile_period(mut self, period: Duration) -> Self {
        self.reconcile_period = period;
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Returns the reconcile period clamped away from zero, so it can drive an interval.
    #[inline]
    pub fn reconcile_period_clamped(&self) -> Duration {
        self.reconcile_period.max(Duration::from_millis(1))
    }
}

impl Default for SupervisorConfig {
    /// - `listen = 127.0.0.1:8300`
    /// - `reconcile_grace = 5s`
    /// - `reconcile_period = 2s`
    /// - `stagger = 1s`
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8300".to_string(),
            reconcile_grace: Duration::from_secs(5),
            reconcile_period: Duration::from_secs(2),
            stagger: Duration::from_secs(1),
        }
    }
}
