//! In-process worker dispatcher
//!
//! A fixed set of worker threads runs CPU-bound task handlers. All
//! bookkeeping (the worker list, the priority queue and the pending result
//! table) is owned by a single control task; callers and workers talk to it
//! over channels, so no lock guards dispatcher state.
//!
//! Worker crashes are detected through exit reports. A crash fails the task
//! the worker was running, if any, and a replacement worker is started so
//! the pool keeps its size.

use gridrun_config::DispatcherConfig;
use gridrun_core::{JobId, JobRecord, JobSource, JobState, Priority, TaskKind};
use gridrun_ipc::{CoordinatorMessage, TaskOutcome, WorkerMessage};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::handlers::HandlerTable;
use crate::queue::PriorityQueue;
use crate::tracker::JobTracker;
use crate::worker::{spawn_worker, WorkerHandle, WorkerStatus};

type TaskReply = oneshot::Sender<Result<JsonValue, ExecutionError>>;

/// Per-offload options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffloadOptions {
    pub priority: Priority,
    /// Overrides the dispatcher's default task timeout
    pub timeout: Option<Duration>,
}

impl OffloadOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Point-in-time view of the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub max_workers: usize,
    pub current_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub in_flight_tasks: usize,
}

/// Handle to an offloaded task
#[derive(Debug)]
pub struct TaskHandle {
    job_id: JobId,
    reply: oneshot::Receiver<Result<JsonValue, ExecutionError>>,
}

impl TaskHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the task to settle
    pub async fn wait(self) -> Result<JsonValue, ExecutionError> {
        self.reply.await.unwrap_or_else(|_| {
            Err(ExecutionError::ShutdownRejection(
                "dispatcher stopped before the task settled".to_string(),
            ))
        })
    }
}

enum Command {
    Submit {
        job_id: JobId,
        kind: TaskKind,
        payload: JsonValue,
        options: OffloadOptions,
        reply: TaskReply,
    },
    Expire {
        job_id: JobId,
        after: Duration,
    },
    Stats(oneshot::Sender<DispatcherStats>),
    Shutdown {
        graceful: bool,
        done: oneshot::Sender<()>,
    },
    FinishShutdown,
    #[cfg(test)]
    Inject(CoordinatorMessage),
}

struct QueuedTask {
    job_id: JobId,
    kind: TaskKind,
    priority: Priority,
    payload: JsonValue,
}

struct PendingTask {
    reply: TaskReply,
    worker_id: Option<String>,
    timer: AbortHandle,
}

impl PendingTask {
    fn settle(self, result: Result<JsonValue, ExecutionError>) {
        self.timer.abort();
        // The caller may have stopped waiting
        let _ = self.reply.send(result);
    }
}

/// Pool of persistent worker threads fed by a priority queue
#[derive(Debug, Clone)]
pub struct WorkerDispatcher {
    commands: mpsc::UnboundedSender<Command>,
    accepting: Arc<AtomicBool>,
    default_timeout: Duration,
}

impl WorkerDispatcher {
    /// Start the worker threads and the control task
    ///
    /// Must be called from within a Tokio runtime. Fails if any task kind
    /// lacks a handler or if a worker thread cannot be started.
    pub fn new(
        config: DispatcherConfig,
        handlers: HandlerTable,
        tracker: Arc<JobTracker>,
    ) -> Result<Self, ExecutionError> {
        handlers.validate()?;
        if config.max_workers == 0 {
            return Err(ExecutionError::ConfigurationError(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let accepting = Arc::new(AtomicBool::new(true));

        let mut core = DispatcherCore {
            default_timeout: config.default_task_timeout,
            config,
            handlers: Arc::new(handlers),
            tracker,
            workers: Vec::new(),
            queue: PriorityQueue::new(),
            pending: HashMap::new(),
            events_tx,
            commands: commands_tx.downgrade(),
            accepting: accepting.clone(),
            next_worker: 0,
            stopping: false,
            stopped: false,
            shutdown_waiters: Vec::new(),
        };

        for _ in 0..core.config.max_workers {
            let worker = core.spawn_worker().inspect_err(|_| core.stop_workers())?;
            core.workers.push(worker);
        }
        info!("Worker dispatcher started with {} workers", core.workers.len());

        let default_timeout = core.default_timeout;
        tokio::spawn(core.run(commands_rx, events_rx));

        Ok(Self {
            commands: commands_tx,
            accepting,
            default_timeout,
        })
    }

    /// Run a task on a worker thread and wait for its result
    pub async fn offload(
        &self,
        kind: TaskKind,
        payload: JsonValue,
        options: OffloadOptions,
    ) -> Result<JsonValue, ExecutionError> {
        self.submit(kind, payload, options)?.wait().await
    }

    /// Queue a task and return a handle to its result
    pub fn submit(
        &self,
        kind: TaskKind,
        payload: JsonValue,
        options: OffloadOptions,
    ) -> Result<TaskHandle, ExecutionError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(shutdown_rejection());
        }

        let job_id = JobId::new();
        let (reply, rx) = oneshot::channel();
        let options = OffloadOptions {
            timeout: Some(options.timeout.unwrap_or(self.default_timeout)),
            ..options
        };

        self.commands
            .send(Command::Submit {
                job_id: job_id.clone(),
                kind,
                payload,
                options,
                reply,
            })
            .map_err(|_| shutdown_rejection())?;

        Ok(TaskHandle { job_id, reply: rx })
    }

    pub async fn stats(&self) -> DispatcherStats {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stats(tx)).is_err() {
            return DispatcherStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the dispatcher
    ///
    /// Queued tasks are rejected at once and new offloads are refused. A
    /// graceful shutdown then gives running tasks the configured grace
    /// period before the workers are stopped; anything still running after
    /// that is rejected. Resolves once every worker has been told to exit.
    pub async fn shutdown(&self, graceful: bool) {
        self.accepting.store(false, Ordering::SeqCst);
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { graceful, done }).is_ok() {
            let _ = rx.await;
        }
    }

    #[cfg(test)]
    fn inject(&self, message: CoordinatorMessage) {
        let _ = self.commands.send(Command::Inject(message));
    }
}

fn shutdown_rejection() -> ExecutionError {
    ExecutionError::ShutdownRejection("worker dispatcher is shutting down".to_string())
}

/// State owned by the control task
struct DispatcherCore {
    config: DispatcherConfig,
    default_timeout: Duration,
    handlers: Arc<HandlerTable>,
    tracker: Arc<JobTracker>,
    workers: Vec<WorkerHandle>,
    queue: PriorityQueue<QueuedTask>,
    pending: HashMap<JobId, PendingTask>,
    events_tx: mpsc::UnboundedSender<CoordinatorMessage>,
    commands: mpsc::WeakUnboundedSender<Command>,
    accepting: Arc<AtomicBool>,
    next_worker: u64,
    stopping: bool,
    stopped: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl DispatcherCore {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = events.recv() => self.handle_worker_message(message),
            }
        }

        // Every handle is gone
        if !self.stopped {
            self.finish_shutdown();
        }
        debug!("Dispatcher control task exiting");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                job_id,
                kind,
                payload,
                options,
                reply,
            } => self.submit(job_id, kind, payload, options, reply),
            Command::Expire { job_id, after } => self.expire(job_id, after),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { graceful, done } => self.begin_shutdown(graceful, done),
            Command::FinishShutdown => self.finish_shutdown(),
            #[cfg(test)]
            Command::Inject(message) => self.handle_worker_message(message),
        }
    }

    fn handle_worker_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Ready { worker_id } => {
                if let Some(worker) = self.worker_mut(&worker_id) {
                    if worker.status == WorkerStatus::Starting {
                        worker.mark_idle();
                        debug!("Worker {} ready", worker_id);
                    }
                }
                self.drain_queue();
            }
            CoordinatorMessage::TaskResult {
                worker_id,
                job_id,
                outcome,
            } => {
                if let Some(worker) = self.worker_mut(&worker_id) {
                    if worker.current_job.as_ref() == Some(&job_id) {
                        worker.mark_idle();
                    }
                }

                match self.pending.remove(&job_id) {
                    Some(task) => {
                        let result = match outcome {
                            TaskOutcome::Success(value) => {
                                self.tracker.transition(&job_id, JobState::Completed, None);
                                Ok(value)
                            }
                            TaskOutcome::Failure(message) => {
                                debug!("Task {} failed: {}", job_id, message);
                                self.tracker.transition(
                                    &job_id,
                                    JobState::Failed,
                                    Some(message.clone()),
                                );
                                Err(ExecutionError::TaskFailed(message))
                            }
                        };
                        task.settle(result);
                    }
                    None => debug!(
                        "Discarding late result for job {} from worker {}",
                        job_id, worker_id
                    ),
                }
                self.drain_queue();
            }
            CoordinatorMessage::Exited { worker_id, clean } => {
                self.handle_exit(worker_id, clean);
            }
        }
        self.finish_drain_if_idle();
    }

    fn handle_exit(&mut self, worker_id: String, clean: bool) {
        let Some(index) = self.workers.iter().position(|w| w.id == worker_id) else {
            debug!("Retired worker {} exited", worker_id);
            return;
        };
        let worker = self.workers.remove(index);

        if self.stopped {
            return;
        }

        if clean {
            warn!(worker_id = %worker_id, "Worker exited unexpectedly");
        } else {
            error!(worker_id = %worker_id, "Worker crashed");
        }

        match worker.current_job {
            Some(job_id) => {
                if let Some(task) = self.pending.remove(&job_id) {
                    let err = ExecutionError::WorkerCrash {
                        worker_id: worker_id.clone(),
                        job_id: job_id.clone(),
                    };
                    self.tracker
                        .transition(&job_id, JobState::Failed, Some(err.to_string()));
                    task.settle(Err(err));
                }
            }
            None => warn!(worker_id = %worker_id, "Crash could not be attributed to a task; worker was idle"),
        }

        if !self.stopping {
            self.replace_worker();
            self.drain_queue();
        }
    }

    fn submit(
        &mut self,
        job_id: JobId,
        kind: TaskKind,
        payload: JsonValue,
        options: OffloadOptions,
        reply: TaskReply,
    ) {
        if self.stopping || self.stopped {
            let _ = reply.send(Err(shutdown_rejection()));
            return;
        }

        self.tracker.register(JobRecord::new(
            job_id.clone(),
            JobSource::Dispatcher,
            kind.as_str(),
            options.priority,
        ));

        let after = options.timeout.unwrap_or(self.default_timeout);
        let timer = self.schedule(after, Command::Expire {
            job_id: job_id.clone(),
            after,
        });

        self.pending.insert(
            job_id.clone(),
            PendingTask {
                reply,
                worker_id: None,
                timer,
            },
        );
        self.queue.push(
            options.priority,
            QueuedTask {
                job_id,
                kind,
                priority: options.priority,
                payload,
            },
        );
        self.drain_queue();
    }

    /// Hand queued tasks to idle workers, highest priority first
    fn drain_queue(&mut self) {
        while !self.queue.is_empty() {
            let Some(index) = self.workers.iter().position(WorkerHandle::is_idle) else {
                break;
            };
            let Some(task) = self.queue.pop() else {
                break;
            };

            let worker = &mut self.workers[index];
            let message = WorkerMessage::Execute {
                job_id: task.job_id.clone(),
                kind: task.kind,
                payload: task.payload.clone(),
            };

            if worker.assign(task.job_id.clone(), message) {
                debug!("Assigned job {} ({}) to worker {}", task.job_id, task.kind, worker.id);
                if let Some(pending) = self.pending.get_mut(&task.job_id) {
                    pending.worker_id = Some(worker.id.clone());
                }
                self.tracker.transition(&task.job_id, JobState::Running, None);
            } else {
                // Its exit report will follow; keep the task's place
                warn!("Worker {} is gone; requeueing job {}", worker.id, task.job_id);
                self.queue.push_front(task.priority, task);
            }
        }
    }

    fn expire(&mut self, job_id: JobId, after: Duration) {
        let Some(task) = self.pending.remove(&job_id) else {
            return;
        };

        let worker_id = task.worker_id.clone();
        if worker_id.is_none() {
            self.queue.remove_first(|queued| queued.job_id == job_id);
        }

        warn!(job_id = %job_id, "Task timed out after {}ms", after.as_millis());
        let err = ExecutionError::Timeout {
            job_id: job_id.clone(),
            timeout_ms: after.as_millis() as u64,
        };
        self.tracker
            .transition(&job_id, JobState::TimedOut, Some(err.to_string()));
        task.settle(Err(err));

        if let Some(worker_id) = worker_id {
            if self.config.recycle_on_timeout && !self.stopping {
                self.recycle(&worker_id);
            }
        }
        self.finish_drain_if_idle();
    }

    /// Retire a worker stuck on an abandoned task and start a replacement
    fn recycle(&mut self, worker_id: &str) {
        let Some(index) = self.workers.iter().position(|w| w.id == worker_id) else {
            return;
        };
        let worker = self.workers.remove(index);
        info!(
            "Recycling worker {} (started {})",
            worker.id,
            worker.started_at.to_rfc3339()
        );
        worker.retire();
        self.replace_worker();
        self.drain_queue();
    }

    fn stats(&self) -> DispatcherStats {
        let count = |status: WorkerStatus| self.workers.iter().filter(|w| w.status == status).count();
        DispatcherStats {
            max_workers: self.config.max_workers,
            current_workers: self.workers.len(),
            idle_workers: count(WorkerStatus::Idle),
            busy_workers: count(WorkerStatus::Busy),
            queued_tasks: self.queue.len(),
            in_flight_tasks: self
                .pending
                .values()
                .filter(|task| task.worker_id.is_some())
                .count(),
        }
    }

    fn begin_shutdown(&mut self, graceful: bool, done: oneshot::Sender<()>) {
        if self.stopped {
            let _ = done.send(());
            return;
        }
        self.shutdown_waiters.push(done);
        if self.stopping {
            return;
        }

        self.stopping = true;
        self.accepting.store(false, Ordering::SeqCst);

        let queued = self.queue.drain();
        info!(
            "Shutting down dispatcher ({}); rejecting {} queued task(s)",
            if graceful { "graceful" } else { "immediate" },
            queued.len()
        );
        for task in queued {
            self.reject(&task.job_id);
        }

        if graceful && !self.pending.is_empty() && !self.config.shutdown_grace.is_zero() {
            self.schedule(self.config.shutdown_grace, Command::FinishShutdown);
        } else {
            self.finish_shutdown();
        }
    }

    /// End a graceful drain early once nothing is in flight
    fn finish_drain_if_idle(&mut self) {
        if self.stopping && !self.stopped && self.pending.is_empty() {
            self.finish_shutdown();
        }
    }

    fn finish_shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stopping = true;
        self.accepting.store(false, Ordering::SeqCst);

        let abandoned: Vec<JobId> = self.pending.keys().cloned().collect();
        for job_id in &abandoned {
            self.reject(job_id);
        }
        self.stop_workers();

        info!(
            "Dispatcher stopped; {} in-flight task(s) rejected",
            abandoned.len()
        );
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn reject(&mut self, job_id: &JobId) {
        if let Some(task) = self.pending.remove(job_id) {
            let err = shutdown_rejection();
            self.tracker
                .transition(job_id, JobState::Failed, Some(err.to_string()));
            task.settle(Err(err));
        }
    }

    fn stop_workers(&mut self) {
        for worker in self.workers.drain(..) {
            worker.retire();
        }
    }

    fn spawn_worker(&mut self) -> Result<WorkerHandle, ExecutionError> {
        self.next_worker += 1;
        spawn_worker(
            format!("worker-{}", self.next_worker),
            self.handlers.clone(),
            self.events_tx.clone(),
        )
    }

    fn replace_worker(&mut self) {
        match self.spawn_worker() {
            Ok(worker) => {
                info!("Started replacement worker {}", worker.id);
                self.workers.push(worker);
            }
            Err(e) => error!("Failed to replace worker: {}", e),
        }
    }

    /// Deliver `command` to this control task after `delay`
    fn schedule(&self, delay: Duration, command: Command) -> AbortHandle {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(command);
            }
        })
        .abort_handle()
    }

    fn worker_mut(&mut self, worker_id: &str) -> Option<&mut WorkerHandle> {
        self.workers.iter_mut().find(|w| w.id == worker_id)
    }
}
