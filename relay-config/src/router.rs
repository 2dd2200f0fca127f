//! Readiness loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Router configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// How long one readiness wait may block before it is re-armed (milliseconds).
    #[validate(range(min = 1, max = 60_000))]
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 {
    1000
}

impl RouterConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}
