use anyhow::{Context, Result};
use gridrun_core::{Priority, TaskKind};
use gridrun_execution::OffloadOptions;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::Managers;

/// Offload one task and print its result
pub async fn handle_offload(
    managers: &Managers,
    kind: &str,
    payload: &str,
    priority: &str,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let kind: TaskKind = kind.parse()?;
    let priority: Priority = priority.parse()?;
    let payload: JsonValue =
        serde_json::from_str(payload).context("Failed to parse --payload as JSON")?;

    let mut options = OffloadOptions::with_priority(priority);
    if let Some(ms) = timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }

    let value = managers
        .dispatcher
        .offload(kind, payload, options)
        .await
        .with_context(|| format!("Task {} failed", kind))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to format result")?
    );
    Ok(())
}
