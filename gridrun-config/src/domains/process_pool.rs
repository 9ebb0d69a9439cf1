//! External process pool configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Configuration for the external script process pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessPoolConfig {
    /// Maximum number of simultaneously live script processes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Directory holding the analytical scripts; also the working directory
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Interpreter used to run scripts
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Environment variable pointed at the scripts directory for module lookup
    #[serde(default = "default_module_path_var")]
    pub module_path_var: String,

    /// Environment variable set to `1` to disable output buffering
    #[serde(default = "default_unbuffered_var")]
    pub unbuffered_var: String,

    /// Grace window between SIGTERM and SIGKILL
    #[serde(
        with = "crate::domains::utils::serde_duration_millis",
        default = "default_kill_grace"
    )]
    pub kill_grace: Duration,

    /// Timeout applied when a submission does not set one; `None` means no timeout
    #[serde(
        with = "crate::domains::utils::serde_duration_millis_option",
        default
    )]
    pub default_timeout: Option<Duration>,
}

impl Default for ProcessPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            scripts_dir: default_scripts_dir(),
            interpreter: default_interpreter(),
            module_path_var: default_module_path_var(),
            unbuffered_var: default_unbuffered_var(),
            kill_grace: default_kill_grace(),
            default_timeout: None,
        }
    }
}

impl Validatable for ProcessPoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_concurrent, "max_concurrent", self.domain_name())?;
        validate_required_string(&self.interpreter, "interpreter", self.domain_name())?;
        validate_required_string(&self.module_path_var, "module_path_var", self.domain_name())?;
        validate_required_string(&self.unbuffered_var, "unbuffered_var", self.domain_name())?;

        if self.scripts_dir.as_os_str().is_empty() {
            return Err(self.validation_error("scripts_dir cannot be empty"));
        }

        validate_positive(
            self.kill_grace.as_millis(),
            "kill_grace",
            self.domain_name(),
        )?;

        if let Some(timeout) = self.default_timeout {
            validate_positive(timeout.as_millis(), "default_timeout", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "process_pool"
    }
}

// Default value functions
fn default_max_concurrent() -> usize {
    num_cpus::get().max(1)
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_interpreter() -> String {
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

fn default_module_path_var() -> String {
    "PYTHONPATH".to_string()
}

fn default_unbuffered_var() -> String {
    "PYTHONUNBUFFERED".to_string()
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(2)
}
