//! Error types for job execution

use gridrun_core::JobId;
use gridrun_ipc::IpcError;
use thiserror::Error;

/// Upper bound on stderr carried in a failure
pub const MAX_STDERR_CHARS: usize = 2000;

/// Job execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Process pool at capacity ({max} live processes); retry later")]
    CapacityExceeded { max: usize },

    #[error("Failed to spawn {target}: {message}")]
    SpawnFailure { target: String, message: String },

    #[error("Invalid script '{script}': {reason}")]
    InvalidScript { script: String, reason: String },

    #[error("Job id already in use: {0}")]
    DuplicateJob(JobId),

    #[error("Malformed script output: {reason}; output: {output}")]
    MalformedOutput { reason: String, output: String },

    #[error("Script exited with {}: {stderr}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Job {job_id} timed out after {timeout_ms}ms")]
    Timeout { job_id: JobId, timeout_ms: u64 },

    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Rejected during shutdown: {0}")]
    ShutdownRejection(String),

    #[error("Worker {worker_id} crashed while running job {job_id}")]
    WorkerCrash { worker_id: String, job_id: JobId },

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl ExecutionError {
    /// Stable snake_case label, suitable for mapping to transport status codes
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::CapacityExceeded { .. } => "capacity_exceeded",
            ExecutionError::SpawnFailure { .. } => "spawn_failure",
            ExecutionError::InvalidScript { .. } => "invalid_script",
            ExecutionError::DuplicateJob(_) => "duplicate_job",
            ExecutionError::MalformedOutput { .. } => "malformed_output",
            ExecutionError::NonZeroExit { .. } => "non_zero_exit",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Cancelled(_) => "cancelled",
            ExecutionError::ShutdownRejection(_) => "shutdown_rejection",
            ExecutionError::WorkerCrash { .. } => "worker_crash",
            ExecutionError::TaskFailed(_) => "task_failed",
            ExecutionError::ConfigurationError(_) => "configuration_error",
            ExecutionError::Internal(_) => "internal",
        }
    }

    /// Whether the same submission may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::CapacityExceeded { .. } | ExecutionError::Timeout { .. }
        )
    }
}

impl From<IpcError> for ExecutionError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::MalformedOutput { reason, output } => {
                ExecutionError::MalformedOutput { reason, output }
            }
            other => ExecutionError::Internal(other.to_string()),
        }
    }
}

impl From<gridrun_config::ConfigError> for ExecutionError {
    fn from(err: gridrun_config::ConfigError) -> Self {
        Self::ConfigurationError(err.to_string())
    }
}
