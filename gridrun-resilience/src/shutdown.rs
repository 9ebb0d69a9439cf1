//! Escalating termination of external processes

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for a process after SIGKILL
const FINAL_WAIT: Duration = Duration::from_secs(5);

/// Termination errors
#[derive(Debug, thiserror::Error)]
pub enum TerminationError {
    /// The platform has no graceful termination signal
    #[error("Graceful termination is not supported on this platform")]
    Unsupported,

    /// Sending a signal failed
    #[error("Failed to signal process {pid}: {message}")]
    SignalFailed { pid: u32, message: String },

    /// Killing or reaping the process failed
    #[error("Failed to terminate process: {0}")]
    Io(#[from] std::io::Error),

    /// The process survived SIGKILL for longer than the final wait
    #[error("Process unresponsive to termination")]
    Unresponsive,
}

/// Send SIGTERM to a process
#[cfg(unix)]
pub fn send_terminate(pid: u32) -> Result<(), TerminationError> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
        TerminationError::SignalFailed {
            pid,
            message: e.to_string(),
        }
    })
}

/// Send SIGTERM to a process
#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) -> Result<(), TerminationError> {
    Err(TerminationError::Unsupported)
}

/// Terminate a child gracefully, escalating to a forceful kill after `grace`
pub async fn terminate_with_grace(
    mut child: Child,
    grace: Duration,
) -> Result<ExitStatus, TerminationError> {
    if let Some(status) = child.try_wait()? {
        debug!("Process already exited with status: {:?}", status);
        return Ok(status);
    }

    // Phase 1: graceful termination
    let graceful = match child.id() {
        Some(pid) => match send_terminate(pid) {
            Ok(()) => {
                debug!(pid, "Sent SIGTERM");
                true
            }
            Err(TerminationError::Unsupported) => false,
            Err(e) => {
                warn!("{}", e);
                false
            }
        },
        None => false,
    };

    if graceful {
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Process terminated gracefully with status: {:?}", status);
                return Ok(status);
            }
            Ok(Err(e)) => {
                error!("Error waiting for process: {}", e);
            }
            Err(_) => {
                warn!(
                    "Process did not terminate within {}ms grace window",
                    grace.as_millis()
                );
            }
        }
    }

    // Phase 2: forced termination
    info!("Forcing process termination");
    child.start_kill()?;

    match timeout(FINAL_WAIT, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("Process terminated forcefully with status: {:?}", status);
            Ok(status)
        }
        Ok(Err(e)) => Err(TerminationError::Io(e)),
        Err(_) => {
            error!("Process did not terminate even after force kill");
            Err(TerminationError::Unresponsive)
        }
    }
}

/// Run [`terminate_with_grace`] in the background
pub fn spawn_reaper(
    child: Child,
    grace: Duration,
) -> JoinHandle<Result<ExitStatus, TerminationError>> {
    tokio::spawn(async move {
        let result = terminate_with_grace(child, grace).await;
        if let Err(e) = &result {
            error!("Process reaper failed: {}", e);
        }
        result
    })
}
