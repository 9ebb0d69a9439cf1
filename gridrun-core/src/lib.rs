//! Core domain types for gridrun
//!
//! Job identities, priorities, lifecycle states and the closed set of
//! in-process task kinds shared by the process pool and the worker
//! dispatcher.

pub mod job;
pub mod types;

// Re-export commonly used types
pub use job::{JobId, JobRecord, JobSource, JobState};
pub use types::{ParseError, Priority, TaskKind};
