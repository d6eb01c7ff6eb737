//! # Service runtime configuration.
//!
//! ## Sentinel values
//! - `prediction_threshold = 0` → response prediction disabled

use std::time::Duration;

/// Settings for one service process.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Address of the supervisor's listener.
    pub supervisor: String,

    /// How long a request waits for its response before rejecting.
    pub response_timeout: Duration,

    /// Identical responses needed before a request's answer is served from cache.
    ///
    /// - `0` = never cache
    pub prediction_threshold: u32,

    /// Period of the counter decay that ages out predictions.
    pub prediction_decay: Duration,
}

impl RuntimeConfig {
    pub fn with_supervisor(mut self, addr: impl Into<String>) -> Self {
        self.supervisor = addr.into();
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_prediction_threshold(mut self, threshold: u32) -> Self {
        self.prediction_threshold = threshold;
        self
    }

    /// Returns the decay period clamped away from zero, so it can drive an interval.
    #[inline]
    pub fn decay_period(&self) -> Duration {
        self.prediction_decay.max(Duration::from_millis(1))
    }
}

impl Default for RuntimeConfig {
    /// - `supervisor = 127.0.0.1:8300`
    /// - `response_timeout = 10s`
    /// - `prediction_threshold = 5`
    /// - `prediction_decay = 2s`
    fn default() -> Self {
        Self {
            supervisor: "127.0.0.1:8300".to_string(),
            response_timeout: Duration::from_secs(10),
            prediction_threshold: 5,
            prediction_decay: Duration::from_secs(2),
        }
    }
}
