//! Command implementations

pub mod config;
pub mod offload;
pub mod run;
pub mod stats;

use anyhow::{Context, Result};
use gridrun_config::GridrunConfig;
use gridrun_execution::{HandlerTable, JobTracker, ProcessPool, WorkerDispatcher};
use std::sync::Arc;
use tracing::info;

/// The orchestration managers, built once per invocation
pub struct Managers {
    pub tracker: Arc<JobTracker>,
    pub pool: ProcessPool,
    pub dispatcher: WorkerDispatcher,
}

impl Managers {
    pub fn start(config: &GridrunConfig) -> Result<Self> {
        let tracker = Arc::new(JobTracker::new(&config.tracker));
        let pool = ProcessPool::new(config.process_pool.clone(), tracker.clone())
            .context("Failed to create process pool")?;
        let dispatcher = WorkerDispatcher::new(
            config.dispatcher.clone(),
            HandlerTable::builtin(),
            tracker.clone(),
        )
        .context("Failed to start worker dispatcher")?;

        Ok(Self {
            tracker,
            pool,
            dispatcher,
        })
    }

    /// Stop both managers, letting in-flight dispatcher tasks drain
    pub async fn shutdown(&self) {
        let cancelled = self.pool.shutdown();
        self.dispatcher.shutdown(true).await;
        info!("Managers stopped ({} script job(s) cancelled)", cancelled);
    }
}
