//! Domain-driven configuration management for gridrun
//!
//! Configuration is split by functional domain (process pool, dispatcher,
//! job tracker, logging), with validation, defaults, and environment
//! variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    dispatcher::DispatcherConfig, logging::LoggingConfig, process_pool::ProcessPoolConfig,
    tracker::TrackerConfig, GridrunConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration_millis, serde_duration_millis_option};
