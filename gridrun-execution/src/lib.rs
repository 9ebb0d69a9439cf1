//! gridrun execution engine
//!
//! The job orchestration core: a bounded pool of external script processes,
//! a fixed pool of in-process worker threads fed by a priority queue, and a
//! job tracker that aggregates status and progress for both.

pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod process;
pub mod queue;
pub mod script;
pub mod tracker;
mod worker;

// Re-export main types
pub use dispatcher::{DispatcherStats, OffloadOptions, TaskHandle, WorkerDispatcher};
pub use error::{ExecutionError, MAX_STDERR_CHARS};
pub use handlers::{HandlerTable, TaskHandler};
pub use process::{ExecuteOptions, JobHandle, ProcessPool, ProcessPoolStats, ProgressCallback};
pub use queue::PriorityQueue;
pub use script::resolve_script;
pub use tracker::{JobEvent, JobTracker};

// Re-export core types used in the public API
pub use gridrun_core::{JobId, JobRecord, JobSource, JobState, Priority, TaskKind};
