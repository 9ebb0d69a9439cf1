//! Structured logging for gridrun
//!
//! Every crate logs through `tracing`; this crate installs the global
//! subscriber. Output always goes to stderr so it never mixes with the
//! machine-readable results a host prints on stdout.

pub mod init;

pub use init::{build_env_filter, init_logging, init_simple_tracing};
