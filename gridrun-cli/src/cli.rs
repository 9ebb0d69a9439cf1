//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an analytical script through the process pool
    Run {
        /// Script path relative to the scripts directory
        script: String,

        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Kill the script if it runs longer than this
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Use this job id instead of a generated one
        #[arg(long, value_name = "ID")]
        job_id: Option<String>,
    },

    /// Offload a profile task to the worker dispatcher
    Offload {
        /// Task kind (profile_summary, scale_profile, resample_profile)
        kind: String,

        /// JSON payload (example: --payload='{"values":[1,2,3]}')
        #[arg(long, value_name = "JSON", default_value = "{}")]
        payload: String,

        /// Queue priority (low, normal, high)
        #[arg(long, value_name = "PRIORITY", default_value = "normal")]
        priority: String,

        /// Fail the task if it has not finished within this time
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Print process pool and dispatcher statistics
    Stats,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Write a sample configuration file
    Generate {
        /// Output file
        #[arg(short, long, value_name = "PATH", default_value = "gridrun.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration as YAML
    Show,
}
