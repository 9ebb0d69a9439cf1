//! Message types exchanged between the dispatcher and its worker threads

use gridrun_core::{JobId, TaskKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Messages sent from the dispatcher to a worker thread
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Run one task
    Execute {
        job_id: JobId,
        kind: TaskKind,
        payload: JsonValue,
    },

    /// Exit the worker loop
    Shutdown,
}

/// Messages sent from worker threads back to the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// Worker initialised and ready for work
    Ready { worker_id: String },

    /// Task finished (successfully or with a handler error)
    TaskResult {
        worker_id: String,
        job_id: JobId,
        outcome: TaskOutcome,
    },

    /// Worker thread is exiting; `clean` is false when it unwound from a panic
    Exited { worker_id: String, clean: bool },
}

impl CoordinatorMessage {
    pub fn worker_id(&self) -> &str {
        match self {
            CoordinatorMessage::Ready { worker_id }
            | CoordinatorMessage::TaskResult { worker_id, .. }
            | CoordinatorMessage::Exited { worker_id, .. } => worker_id,
        }
    }
}

/// Result reported by a task handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success(JsonValue),
    Failure(String),
}

impl From<Result<JsonValue, String>> for TaskOutcome {
    fn from(result: Result<JsonValue, String>) -> Self {
        match result {
            Ok(value) => TaskOutcome::Success(value),
            Err(message) => TaskOutcome::Failure(message),
        }
    }
}
