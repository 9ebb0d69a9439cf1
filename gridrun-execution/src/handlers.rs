//! Task handlers run on dispatcher worker threads
//!
//! Every [`TaskKind`] must map to a handler before the dispatcher starts.
//! Handlers are synchronous, CPU-bound functions over JSON payloads.

use gridrun_core::TaskKind;
use gridrun_ipc::TaskOutcome;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ExecutionError;

/// A registered task handler
pub type TaskHandler = Arc<dyn Fn(JsonValue) -> Result<JsonValue, String> + Send + Sync>;

/// Fixed mapping from task kind to handler
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<TaskKind, TaskHandler>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(TaskKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerTable").field("kinds", &kinds).finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in profile handlers for every kind
    pub fn builtin() -> Self {
        Self::new()
            .register(TaskKind::ProfileSummary, profile_summary)
            .register(TaskKind::ScaleProfile, scale_profile)
            .register(TaskKind::ResampleProfile, resample_profile)
    }

    /// Register (or replace) the handler for `kind`
    pub fn register<F>(mut self, kind: TaskKind, handler: F) -> Self
    where
        F: Fn(JsonValue) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Kinds without a handler
    pub fn missing(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .iter()
            .copied()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    /// Fail unless every task kind has a handler
    pub fn validate(&self) -> Result<(), ExecutionError> {
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter().map(TaskKind::as_str).collect();
        Err(ExecutionError::ConfigurationError(format!(
            "no handler registered for task kind(s): {}",
            names.join(", ")
        )))
    }

    /// Run the handler for `kind`; panics propagate to the worker thread
    pub(crate) fn run(&self, kind: TaskKind, payload: JsonValue) -> TaskOutcome {
        match self.handlers.get(&kind) {
            Some(handler) => handler(payload).into(),
            None => TaskOutcome::Failure(format!("no handler for task kind {}", kind)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProfileInput {
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ScaleInput {
    values: Vec<f64>,
    target_total: f64,
}

#[derive(Debug, Deserialize)]
struct ResampleInput {
    values: Vec<f64>,
    bucket: usize,
}

fn parse<T: for<'de> Deserialize<'de>>(payload: JsonValue) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("invalid payload: {}", e))
}

/// Count, extremes, mean, total and peak position of a load profile
fn profile_summary(payload: JsonValue) -> Result<JsonValue, String> {
    let input: ProfileInput = parse(payload)?;
    if input.values.is_empty() {
        return Err("profile has no values".to_string());
    }

    let total: f64 = input.values.iter().sum();
    let (peak_index, peak) = input
        .values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best });
    let min = input.values.iter().copied().fold(f64::INFINITY, f64::min);

    Ok(json!({
        "count": input.values.len(),
        "min": min,
        "max": peak,
        "mean": total / input.values.len() as f64,
        "total": total,
        "peak_index": peak_index,
    }))
}

/// Scale a profile so its values sum to `target_total`
fn scale_profile(payload: JsonValue) -> Result<JsonValue, String> {
    let input: ScaleInput = parse(payload)?;
    let total: f64 = input.values.iter().sum();
    if total == 0.0 {
        return Err("cannot scale a profile whose total is zero".to_string());
    }

    let factor = input.target_total / total;
    let values: Vec<f64> = input.values.iter().map(|v| v * factor).collect();
    Ok(json!({ "values": values, "factor": factor }))
}

/// Sum consecutive buckets of `bucket` values; a short final bucket is kept
fn resample_profile(payload: JsonValue) -> Result<JsonValue, String> {
    let input: ResampleInput = parse(payload)?;
    if input.bucket == 0 {
        return Err("bucket size must be positive".to_string());
    }

    let values: Vec<f64> = input
        .values
        .chunks(input.bucket)
        .map(|chunk| chunk.iter().sum())
        .collect();
    Ok(json!({ "values": values, "bucket": input.bucket }))
}
