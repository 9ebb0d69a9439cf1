//! Resilience patterns for gridrun
//!
//! Currently this is process termination with escalating urgency: a
//! graceful signal first, a forceful kill once a grace window has passed.

pub mod shutdown;

// Re-export commonly used types
pub use shutdown::{send_terminate, spawn_reaper, terminate_with_grace, TerminationError};
