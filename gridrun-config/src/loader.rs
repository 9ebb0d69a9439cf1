//! Configuration loading and environment variable handling

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::domains::GridrunConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "GRIDRUN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<GridrunConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml_str(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<GridrunConfig> {
        let mut config: GridrunConfig = if content.trim().is_empty() {
            GridrunConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<GridrunConfig> {
        let mut config = GridrunConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<GridrunConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut GridrunConfig) -> ConfigResult<()> {
        self.apply_process_pool_overrides(&mut config.process_pool)?;
        self.apply_dispatcher_overrides(&mut config.dispatcher)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply process pool config overrides
    fn apply_process_pool_overrides(
        &self,
        config: &mut crate::domains::process_pool::ProcessPoolConfig,
    ) -> ConfigResult<()> {
        if let Some(max) = self.parse_env_var::<usize>("MAX_PROCESSES")? {
            config.max_concurrent = max;
        }

        if let Ok(dir) = self.get_env_var("SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }

        if let Ok(interpreter) = self.get_env_var("INTERPRETER") {
            config.interpreter = interpreter;
        }

        if let Some(millis) = self.parse_env_var::<u64>("PROCESS_TIMEOUT_MS")? {
            config.default_timeout = Some(Duration::from_millis(millis));
        }

        Ok(())
    }

    /// Apply dispatcher config overrides
    fn apply_dispatcher_overrides(
        &self,
        config: &mut crate::domains::dispatcher::DispatcherConfig,
    ) -> ConfigResult<()> {
        if let Some(max) = self.parse_env_var::<usize>("MAX_WORKERS")? {
            config.max_workers = max;
        }

        if let Some(millis) = self.parse_env_var::<u64>("TASK_TIMEOUT_MS")? {
            config.default_task_timeout = Duration::from_millis(millis);
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Parse an optional prefixed environment variable
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
