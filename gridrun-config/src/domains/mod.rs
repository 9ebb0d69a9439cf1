//! Domain-specific configuration modules

pub mod dispatcher;
pub mod logging;
pub mod process_pool;
pub mod tracker;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main gridrun configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GridrunConfig {
    /// External script process pool
    #[serde(default)]
    pub process_pool: process_pool::ProcessPoolConfig,

    /// In-process worker dispatcher
    #[serde(default)]
    pub dispatcher: dispatcher::DispatcherConfig,

    /// Job status tracking
    #[serde(default)]
    pub tracker: tracker::TrackerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl GridrunConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.process_pool.validate()?;
        self.dispatcher.validate()?;
        self.tracker.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = GridrunConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
