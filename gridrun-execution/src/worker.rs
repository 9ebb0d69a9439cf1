//! Worker threads owned by the dispatcher

use chrono::{DateTime, Utc};
use gridrun_core::JobId;
use gridrun_ipc::{CoordinatorMessage, WorkerMessage};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::ExecutionError;
use crate::handlers::HandlerTable;

/// Worker lifecycle as seen by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerStatus {
    /// Spawned, not yet reported ready
    Starting,
    Idle,
    Busy,
    /// Its channel closed; waiting for the exit report
    Unavailable,
}

/// Dispatcher-side handle to one worker thread
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub id: String,
    pub status: WorkerStatus,
    pub current_job: Option<JobId>,
    pub started_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    /// Hand a task to the worker; false if the thread is gone
    pub fn assign(&mut self, job_id: JobId, message: WorkerMessage) -> bool {
        if self.sender.send(message).is_err() {
            self.status = WorkerStatus::Unavailable;
            return false;
        }
        self.status = WorkerStatus::Busy;
        self.current_job = Some(job_id);
        true
    }

    pub fn mark_idle(&mut self) {
        self.status = WorkerStatus::Idle;
        self.current_job = None;
    }

    /// Ask the worker to exit after any task it is running
    pub fn retire(self) {
        // Already exited if this fails
        let _ = self.sender.send(WorkerMessage::Shutdown);
    }
}

/// Reports the thread's exit, including unwinding from a panic
struct ExitGuard {
    worker_id: String,
    events: mpsc::UnboundedSender<CoordinatorMessage>,
    clean: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let clean = self.clean && !thread::panicking();
        let _ = self.events.send(CoordinatorMessage::Exited {
            worker_id: self.worker_id.clone(),
            clean,
        });
    }
}

/// Start a worker thread and return its handle
pub(crate) fn spawn_worker(
    id: String,
    handlers: Arc<HandlerTable>,
    events: mpsc::UnboundedSender<CoordinatorMessage>,
) -> Result<WorkerHandle, ExecutionError> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let worker_id = id.clone();

    thread::Builder::new()
        .name(format!("gridrun-{}", id))
        .spawn(move || worker_loop(worker_id, handlers, receiver, events))
        .map_err(|e| {
            error!("Failed to spawn worker thread {}: {}", id, e);
            ExecutionError::SpawnFailure {
                target: format!("worker thread {}", id),
                message: e.to_string(),
            }
        })?;

    debug!("Spawned worker {}", id);
    Ok(WorkerHandle {
        id,
        status: WorkerStatus::Starting,
        current_job: None,
        started_at: Utc::now(),
        sender,
    })
}

fn worker_loop(
    worker_id: String,
    handlers: Arc<HandlerTable>,
    mut receiver: mpsc::UnboundedReceiver<WorkerMessage>,
    events: mpsc::UnboundedSender<CoordinatorMessage>,
) {
    let mut guard = ExitGuard {
        worker_id: worker_id.clone(),
        events: events.clone(),
        clean: false,
    };

    if events
        .send(CoordinatorMessage::Ready {
            worker_id: worker_id.clone(),
        })
        .is_ok()
    {
        while let Some(message) = receiver.blocking_recv() {
            match message {
                WorkerMessage::Execute {
                    job_id,
                    kind,
                    payload,
                } => {
                    let outcome = handlers.run(kind, payload);
                    let reply = CoordinatorMessage::TaskResult {
                        worker_id: worker_id.clone(),
                        job_id,
                        outcome,
                    };
                    if events.send(reply).is_err() {
                        break;
                    }
                }
                WorkerMessage::Shutdown => break,
            }
        }
    }

    guard.clean = true;
}
