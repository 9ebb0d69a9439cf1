use anyhow::{Context, Result};
use gridrun_core::JobId;
use gridrun_execution::ExecuteOptions;
use std::time::Duration;
use tracing::{info, warn};

use super::Managers;

/// Run one script, streaming progress to stderr and the result to stdout
pub async fn handle_run(
    managers: &Managers,
    script: &str,
    args: &[String],
    timeout_ms: Option<u64>,
    job_id: Option<&str>,
) -> Result<()> {
    let mut options = ExecuteOptions::new().with_progress(|data| eprintln!("progress: {}", data));
    if let Some(ms) = timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    if let Some(id) = job_id {
        let id: JobId = id.parse().context("Invalid --job-id")?;
        options = options.with_job_id(id);
    }

    let handle = managers
        .pool
        .submit(script, args, options)
        .with_context(|| format!("Failed to start script {}", script))?;
    let job_id = handle.job_id().clone();
    info!("Submitted {} as job {}", script, job_id);

    let wait = handle.wait();
    tokio::pin!(wait);
    let result = tokio::select! {
        result = &mut wait => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; cancelling job {}", job_id);
            managers.pool.cancel(&job_id);
            wait.await
        }
    };

    let value = result.with_context(|| format!("Job {} failed", job_id))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to format result")?
    );
    Ok(())
}
