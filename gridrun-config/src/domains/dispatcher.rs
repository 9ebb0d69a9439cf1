//! In-process worker dispatcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_at_most, validate_positive, Validatable};

/// Upper bound on the number of worker threads
pub const MAX_WORKERS_CAP: usize = 16;

/// Configuration for the worker thread dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Fixed number of persistent worker threads
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Timeout applied when an offload does not set one
    #[serde(
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_task_timeout"
    )]
    pub default_task_timeout: Duration,

    /// Time granted to in-flight tasks during a graceful shutdown
    #[serde(
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_shutdown_grace"
    )]
    pub shutdown_grace: Duration,

    /// Retire and replace a worker whose task timed out
    #[serde(default = "crate::domains::utils::default_false")]
    pub recycle_on_timeout: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            default_task_timeout: default_task_timeout(),
            shutdown_grace: default_shutdown_grace(),
            recycle_on_timeout: false,
        }
    }
}

impl Validatable for DispatcherConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_workers, "max_workers", self.domain_name())?;
        validate_at_most(
            self.max_workers,
            MAX_WORKERS_CAP,
            "max_workers",
            self.domain_name(),
        )?;
        validate_positive(
            self.default_task_timeout.as_millis(),
            "default_task_timeout",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "dispatcher"
    }
}

// Default value functions
fn default_max_workers() -> usize {
    num_cpus::get().saturating_sub(1).clamp(1, MAX_WORKERS_CAP)
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_is_bounded() {
        let config = DispatcherConfig::default();
        assert!(config.max_workers >= 1);
        assert!(config.max_workers <= MAX_WORKERS_CAP);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_cap_enforced() {
        let config = DispatcherConfig {
            max_workers: MAX_WORKERS_CAP + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_grace_is_allowed() {
        let config = DispatcherConfig {
            shutdown_grace: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
