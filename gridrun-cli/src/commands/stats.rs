use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;

use super::Managers;

pub async fn handle_stats(managers: &Managers) -> Result<()> {
    let counts: BTreeMap<String, usize> = managers
        .tracker
        .counts()
        .into_iter()
        .map(|(state, count)| (state.to_string(), count))
        .collect();

    let report = json!({
        "process_pool": managers.pool.stats(),
        "dispatcher": managers.dispatcher.stats().await,
        "job_counts": counts,
        "jobs": managers.tracker.snapshot(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to format statistics")?
    );
    Ok(())
}
