use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tracker behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// How far apart a pre-send and a post-send notification sharing a
    /// subject may be and still be treated as the same send (seconds)
    #[serde(default = "default_correlation_window_secs")]
    pub correlation_window_secs: u64,

    /// Label each attempt with the call site that triggered it
    #[serde(default)]
    pub record_caller: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            correlation_window_secs: default_correlation_window_secs(),
            record_caller: false,
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub const fn correlation_window(&self) -> Duration {
        Duration::from_secs(self.correlation_window_secs)
    }
}

const fn default_correlation_window_secs() -> u64 {
    5
}
