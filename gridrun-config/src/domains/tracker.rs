//! Job tracker configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Configuration for job status tracking and event fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Number of finished job records kept for status queries
    #[serde(default = "default_retain_finished")]
    pub retain_finished: usize,

    /// Capacity of the broadcast channel carrying job events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retain_finished: default_retain_finished(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Validatable for TrackerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.event_capacity, "event_capacity", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "tracker"
    }
}

fn default_retain_finished() -> usize {
    100
}

fn default_event_capacity() -> usize {
    256
}
