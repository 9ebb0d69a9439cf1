//! Inter-process communication for gridrun
//!
//! This crate provides the stdout protocol spoken by analytical scripts
//! (`PROGRESS:{json}` lines followed by one JSON result) and the message
//! types exchanged between the worker dispatcher and its worker threads.

pub mod decoder;
pub mod error;
pub mod protocol;

// Re-export commonly used types
pub use decoder::{
    classify_line, tail_diagnostic, truncate_diagnostic, LineDecoder, ScriptOutput, StdoutLine,
    MAX_DIAGNOSTIC_CHARS, PROGRESS_MARKER,
};
pub use error::IpcError;
pub use protocol::{CoordinatorMessage, TaskOutcome, WorkerMessage};
