//! Bounded pool of external script processes
//!
//! Each submission spawns one interpreter process. Admission is fail-fast:
//! when `max_concurrent` processes are live the submission is rejected with
//! [`ExecutionError::CapacityExceeded`] rather than queued.
//!
//! A job's slot is the single settlement point. Whoever removes the slot
//! first (normal exit, timeout or cancellation) decides the outcome, so a job
//! settles exactly once and frees its capacity exactly once.

use chrono::{DateTime, Utc};
use gridrun_config::ProcessPoolConfig;
use gridrun_core::{JobId, JobRecord, JobSource, JobState, Priority};
use gridrun_ipc::{tail_diagnostic, LineDecoder, ScriptOutput};
use gridrun_resilience::spawn_reaper;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionError, MAX_STDERR_CHARS};
use crate::script::resolve_script;
use crate::tracker::JobTracker;

/// Raw stderr retained per process before truncation
const STDERR_CAPTURE_BYTES: usize = 64 * 1024;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Receives each progress payload of one job, in emission order
pub type ProgressCallback = Arc<dyn Fn(JsonValue) + Send + Sync>;

/// Per-submission options
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub on_progress: Option<ProgressCallback>,
    /// Overrides the pool's default timeout
    pub timeout: Option<Duration>,
    /// Caller supplied id; generated when absent
    pub job_id: Option<JobId>,
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("timeout", &self.timeout)
            .field("job_id", &self.job_id)
            .finish()
    }
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(JsonValue) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessPoolStats {
    pub max_concurrent: usize,
    pub active: usize,
    pub active_jobs: Vec<JobId>,
}

/// Handle to a submitted job; resolves exactly once
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    driver: JoinHandle<Result<JsonValue, ExecutionError>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the job to settle
    pub async fn wait(self) -> Result<JsonValue, ExecutionError> {
        self.driver
            .await
            .map_err(|e| ExecutionError::Internal(format!("job driver failed: {}", e)))?
    }
}

struct WorkerSlot {
    script: String,
    pid: Option<u32>,
    spawned_at: DateTime<Utc>,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct PoolState {
    slots: HashMap<JobId, WorkerSlot>,
    shutting_down: bool,
}

struct PoolInner {
    config: ProcessPoolConfig,
    scripts_dir: PathBuf,
    state: Mutex<PoolState>,
    tracker: Arc<JobTracker>,
}

impl PoolInner {
    /// Claim the settlement right for a job; false if someone else already did
    fn release(&self, job_id: &JobId) -> bool {
        self.state.lock().slots.remove(job_id).is_some()
    }
}

/// Pool of external interpreter processes
#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessPool")
            .field("scripts_dir", &self.inner.scripts_dir)
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .finish()
    }
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

impl ProcessPool {
    /// Create a pool; the scripts directory is made absolute so that it is
    /// valid both as the child's working directory and as the script prefix
    pub fn new(config: ProcessPoolConfig, tracker: Arc<JobTracker>) -> Result<Self, ExecutionError> {
        if config.max_concurrent == 0 {
            return Err(ExecutionError::ConfigurationError(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        let scripts_dir = std::path::absolute(&config.scripts_dir).map_err(|e| {
            ExecutionError::ConfigurationError(format!(
                "cannot resolve scripts directory {}: {}",
                config.scripts_dir.display(),
                e
            ))
        })?;

        info!(
            "Process pool ready: max {} processes, scripts in {}",
            config.max_concurrent,
            scripts_dir.display()
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                scripts_dir,
                state: Mutex::new(PoolState::default()),
                tracker,
            }),
        })
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.inner.tracker
    }

    /// Run a script to completion
    pub async fn execute(
        &self,
        script: &str,
        args: &[String],
        options: ExecuteOptions,
    ) -> Result<JsonValue, ExecutionError> {
        self.submit(script, args, options)?.wait().await
    }

    /// Start a script and return a handle to its result
    ///
    /// Admission errors are returned immediately, before any process exists.
    pub fn submit(
        &self,
        script: &str,
        args: &[String],
        options: ExecuteOptions,
    ) -> Result<JobHandle, ExecutionError> {
        let inner = &self.inner;
        let script_path = resolve_script(&inner.scripts_dir, script)?;
        let job_id = options.job_id.unwrap_or_default();
        let timeout = options.timeout.or(inner.config.default_timeout);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // Reserve the slot before spawning so concurrent submissions cannot
        // both pass the capacity check
        {
            let mut state = inner.state.lock();
            if state.shutting_down {
                return Err(ExecutionError::ShutdownRejection(
                    "process pool is shutting down".to_string(),
                ));
            }
            if state.slots.contains_key(&job_id) {
                return Err(ExecutionError::DuplicateJob(job_id));
            }
            if state.slots.len() >= inner.config.max_concurrent {
                warn!(
                    "Rejecting {}: {} of {} processes live",
                    script,
                    state.slots.len(),
                    inner.config.max_concurrent
                );
                return Err(ExecutionError::CapacityExceeded {
                    max: inner.config.max_concurrent,
                });
            }
            state.slots.insert(
                job_id.clone(),
                WorkerSlot {
                    script: script.to_string(),
                    pid: None,
                    spawned_at: Utc::now(),
                    cancel: Some(cancel_tx),
                },
            );
        }

        inner.tracker.register(JobRecord::new(
            job_id.clone(),
            JobSource::ProcessPool,
            script,
            Priority::Normal,
        ));

        let mut child = match self.command(&script_path, args).spawn() {
            Ok(child) => child,
            Err(e) => {
                inner.release(&job_id);
                let message = e.to_string();
                error!("Failed to spawn {} for {}: {}", inner.config.interpreter, script, message);
                inner
                    .tracker
                    .transition(&job_id, JobState::Failed, Some(message.clone()));
                return Err(ExecutionError::SpawnFailure {
                    target: format!("{} {}", inner.config.interpreter, script),
                    message,
                });
            }
        };

        let pid = child.id();
        if let Some(slot) = inner.state.lock().slots.get_mut(&job_id) {
            slot.pid = pid;
        }
        inner.tracker.transition(&job_id, JobState::Running, None);
        info!(job_id = %job_id, pid = ?pid, "Started script {}", script);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let driver = tokio::spawn(drive(
            inner.clone(),
            job_id.clone(),
            child,
            stdout,
            stderr,
            cancel_rx,
            timeout,
            options.on_progress,
        ));

        Ok(JobHandle { job_id, driver })
    }

    fn command(&self, script_path: &std::path::Path, args: &[String]) -> Command {
        let config = &self.inner.config;
        let mut command = Command::new(&config.interpreter);
        command
            .arg(script_path)
            .args(args)
            .current_dir(&self.inner.scripts_dir)
            .env(&config.module_path_var, &self.inner.scripts_dir)
            .env(&config.unbuffered_var, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Cancel a live job; false if it is unknown or already settled
    pub fn cancel(&self, job_id: &JobId) -> bool {
        let slot = self.inner.state.lock().slots.remove(job_id);
        match slot {
            Some(mut slot) => {
                info!(job_id = %job_id, pid = ?slot.pid, "Cancelling script {}", slot.script);
                if let Some(cancel) = slot.cancel.take() {
                    // The driver may have just exited; its result is discarded
                    let _ = cancel.send(());
                }
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> ProcessPoolStats {
        let state = self.inner.state.lock();
        let mut jobs: Vec<(&JobId, &WorkerSlot)> = state.slots.iter().collect();
        jobs.sort_by_key(|(_, slot)| slot.spawned_at);

        ProcessPoolStats {
            max_concurrent: self.inner.config.max_concurrent,
            active: state.slots.len(),
            active_jobs: jobs.into_iter().map(|(id, _)| id.clone()).collect(),
        }
    }

    /// Refuse new submissions and cancel every live job
    pub fn shutdown(&self) -> usize {
        let live: Vec<JobId> = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            state.slots.keys().cloned().collect()
        };

        let cancelled = live.iter().filter(|id| self.cancel(id)).count();
        info!("Process pool shut down; cancelled {} live job(s)", cancelled);
        cancelled
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    inner: Arc<PoolInner>,
    job_id: JobId,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    mut cancel_rx: oneshot::Receiver<()>,
    timeout: Option<Duration>,
    on_progress: Option<ProgressCallback>,
) -> Result<JsonValue, ExecutionError> {
    let _guard = DriverGuard {
        inner: inner.clone(),
        job_id: job_id.clone(),
    };
    let stderr_task = stderr.map(|stderr| tokio::spawn(collect_stderr(stderr)));

    let mut decoder = LineDecoder::new();
    let mut output = ScriptOutput::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    // A deadline past the clock's range never fires
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let expiry = async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expiry);

    let mut stdout = stdout;
    let mut deliver = |line: String| {
        if let Some(data) = output.accept(&line) {
            inner.tracker.progress(&job_id, data.clone());
            if let Some(callback) = &on_progress {
                callback(data);
            }
        }
    };

    let ending = loop {
        tokio::select! {
            biased;

            _ = &mut cancel_rx => break Ending::Cancelled,
            _ = &mut expiry => break Ending::TimedOut(timeout.unwrap_or_default()),
            read = read_chunk(&mut stdout, &mut buf), if stdout.is_some() => match read {
                Ok(0) => {
                    if let Some(line) = decoder.finish() {
                        deliver(line);
                    }
                    stdout = None;
                }
                Ok(n) => {
                    for line in decoder.push(&buf[..n]) {
                        deliver(line);
                    }
                }
                Err(e) => {
                    warn!("Failed reading stdout of job {}: {}", job_id, e);
                    stdout = None;
                }
            },
            status = child.wait(), if stdout.is_none() => break Ending::Exited(status),
        }
    };
    drop(deliver);

    match ending {
        Ending::Cancelled => {
            spawn_reaper(child, inner.config.kill_grace);
            settle(&inner, &job_id, JobState::Cancelled, Err(ExecutionError::Cancelled(job_id.clone())))
        }
        Ending::TimedOut(after) => {
            let won = inner.release(&job_id);
            spawn_reaper(child, inner.config.kill_grace);
            if won {
                warn!(job_id = %job_id, "Job timed out after {}ms", after.as_millis());
                let err = ExecutionError::Timeout {
                    job_id: job_id.clone(),
                    timeout_ms: after.as_millis() as u64,
                };
                settle(&inner, &job_id, JobState::TimedOut, Err(err))
            } else {
                settle(&inner, &job_id, JobState::Cancelled, Err(ExecutionError::Cancelled(job_id.clone())))
            }
        }
        Ending::Exited(status) => {
            if !inner.release(&job_id) {
                // A cancellation claimed the slot while the process was exiting
                return settle(&inner, &job_id, JobState::Cancelled, Err(ExecutionError::Cancelled(job_id.clone())));
            }

            let stderr_text = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            if !stderr_text.is_empty() {
                debug!("Job {} stderr: {}", job_id, tail_diagnostic(&stderr_text, MAX_STDERR_CHARS));
            }

            let result = match status {
                Ok(status) if status.success() => output.into_result().map_err(ExecutionError::from),
                Ok(status) => Err(ExecutionError::NonZeroExit {
                    code: status.code(),
                    stderr: tail_diagnostic(stderr_text.trim_end(), MAX_STDERR_CHARS),
                }),
                Err(e) => Err(ExecutionError::Internal(format!(
                    "failed to wait for job {}: {}",
                    job_id, e
                ))),
            };

            let state = if result.is_ok() { JobState::Completed } else { JobState::Failed };
            settle(&inner, &job_id, state, result)
        }
    }
}

/// Frees the slot if the driver unwinds before settling the job
struct DriverGuard {
    inner: Arc<PoolInner>,
    job_id: JobId,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if self.inner.release(&self.job_id) {
            error!(job_id = %self.job_id, "Job driver stopped before settling");
            self.inner.tracker.transition(
                &self.job_id,
                JobState::Failed,
                Some("job driver stopped before settling".to_string()),
            );
        }
    }
}

fn settle(
    inner: &PoolInner,
    job_id: &JobId,
    state: JobState,
    result: Result<JsonValue, ExecutionError>,
) -> Result<JsonValue, ExecutionError> {
    let error = result.as_ref().err().map(ToString::to_string);
    match &error {
        Some(message) => info!("Job {} settled as {}: {}", job_id, state, message),
        None => info!("Job {} completed", job_id),
    }
    inner.tracker.transition(job_id, state, error);
    result
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

/// Drain stderr, keeping only the most recent bytes
async fn collect_stderr<R>(mut stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                if captured.len() > STDERR_CAPTURE_BYTES {
                    let excess = captured.len() - STDERR_CAPTURE_BYTES;
                    captured.drain(..excess);
                }
            }
            Err(e) => {
                debug!("Stopped reading stderr: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}
