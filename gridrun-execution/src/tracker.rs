//! Job status tracking and progress fan-out
//!
//! Both managers report lifecycle changes here. The tracker keeps a record
//! per live job, a bounded history of finished jobs, and broadcasts every
//! state change and progress payload to subscribers.

use gridrun_config::TrackerConfig;
use gridrun_core::{JobId, JobRecord, JobState};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event published for every state change and progress payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    StateChanged {
        job_id: JobId,
        state: JobState,
        error: Option<String>,
    },
    Progress {
        job_id: JobId,
        data: JsonValue,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::StateChanged { job_id, .. } | JobEvent::Progress { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    live: HashMap<JobId, JobRecord>,
    finished: VecDeque<JobRecord>,
}

/// Aggregated job status for the process pool and the dispatcher
#[derive(Debug)]
pub struct JobTracker {
    state: Mutex<TrackerState>,
    events: broadcast::Sender<JobEvent>,
    retain_finished: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl JobTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            state: Mutex::new(TrackerState::default()),
            events,
            retain_finished: config.retain_finished,
        }
    }

    /// Subscribe to job events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Start tracking a newly submitted job
    pub fn register(&self, record: JobRecord) {
        let event = JobEvent::StateChanged {
            job_id: record.id.clone(),
            state: record.state,
            error: None,
        };
        self.state.lock().live.insert(record.id.clone(), record);
        self.publish(event);
    }

    /// Move a job to `next`; illegal transitions are logged and ignored
    pub fn transition(&self, job_id: &JobId, next: JobState, error: Option<String>) -> bool {
        let mut state = self.state.lock();

        let Some(record) = state.live.get_mut(job_id) else {
            debug!("Ignoring {} for untracked job {}", next, job_id);
            return false;
        };

        if !record.state.can_transition_to(next) {
            warn!(
                "Ignoring illegal transition {} -> {} for job {}",
                record.state, next, job_id
            );
            return false;
        }

        let now = chrono::Utc::now();
        record.state = next;
        if next == JobState::Running {
            record.started_at = Some(now);
        }
        if next.is_terminal() {
            record.finished_at = Some(now);
            record.error = error.clone();
        }

        if next.is_terminal() {
            if let Some(record) = state.live.remove(job_id) {
                state.finished.push_back(record);
                while state.finished.len() > self.retain_finished {
                    state.finished.pop_front();
                }
            }
        }
        drop(state);

        self.publish(JobEvent::StateChanged {
            job_id: job_id.clone(),
            state: next,
            error,
        });
        true
    }

    /// Relay a progress payload; payloads for settled jobs are dropped
    pub fn progress(&self, job_id: &JobId, data: JsonValue) -> bool {
        if !self.state.lock().live.contains_key(job_id) {
            debug!("Dropping progress for settled job {}", job_id);
            return false;
        }
        self.publish(JobEvent::Progress {
            job_id: job_id.clone(),
            data,
        });
        true
    }

    /// Current record for a live or recently finished job
    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        let state = self.state.lock();
        state
            .live
            .get(job_id)
            .or_else(|| state.finished.iter().rev().find(|r| &r.id == job_id))
            .cloned()
    }

    /// All live records followed by retained finished ones, oldest first
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let state = self.state.lock();
        let mut live: Vec<JobRecord> = state.live.values().cloned().collect();
        live.sort_by_key(|r| r.submitted_at);
        live.extend(state.finished.iter().cloned());
        live
    }

    /// Number of tracked records per state
    pub fn counts(&self) -> HashMap<JobState, usize> {
        let state = self.state.lock();
        let mut counts = HashMap::new();
        for record in state.live.values().chain(state.finished.iter()) {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        counts
    }

    fn publish(&self, event: JobEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }
}
