use futures::future::join_all;
use gridrun_config::DispatcherConfig;
use gridrun_execution::{
    DispatcherStats, ExecutionError, HandlerTable, JobState, JobTracker, OffloadOptions, Priority,
    TaskKind, WorkerDispatcher,
};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Log = Arc<Mutex<Vec<String>>>;

fn config(max_workers: usize) -> DispatcherConfig {
    DispatcherConfig {
        max_workers,
        default_task_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(2),
        recycle_on_timeout: false,
    }
}

/// Profile summary handler that can sleep, panic and record a tag
fn scripted_handlers(log: Log) -> HandlerTable {
    HandlerTable::builtin().register(TaskKind::ProfileSummary, move |payload: JsonValue| {
        if let Some(ms) = payload["sleep_ms"].as_u64() {
            std::thread::sleep(Duration::from_millis(ms));
        }
        if payload["panic"].as_bool() == Some(true) {
            panic!("handler crashed");
        }
        if let Some(tag) = payload["tag"].as_str() {
            log.lock().push(tag.to_string());
        }
        Ok(payload)
    })
}

fn dispatcher(config: DispatcherConfig) -> (WorkerDispatcher, Log, Arc<JobTracker>) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let tracker = Arc::new(JobTracker::default());
    let dispatcher =
        WorkerDispatcher::new(config, scripted_handlers(log.clone()), tracker.clone()).unwrap();
    (dispatcher, log, tracker)
}

async fn wait_for<F>(dispatcher: &WorkerDispatcher, mut predicate: F) -> DispatcherStats
where
    F: FnMut(&DispatcherStats) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = dispatcher.stats().await;
        if predicate(&stats) || Instant::now() > deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn task(tag: &str, sleep_ms: u64) -> JsonValue {
    json!({"tag": tag, "sleep_ms": sleep_ms})
}

#[tokio::test]
async fn test_builtin_handlers() {
    let dispatcher = WorkerDispatcher::new(
        config(2),
        HandlerTable::builtin(),
        Arc::new(JobTracker::default()),
    )
    .unwrap();

    let summary = dispatcher
        .offload(
            TaskKind::ProfileSummary,
            json!({"values": [4.0, 9.0, 2.0]}),
            OffloadOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(summary["peak_index"], 1);

    let resampled = dispatcher
        .offload(
            TaskKind::ResampleProfile,
            json!({"values": [1.0, 1.0, 1.0, 1.0], "bucket": 2}),
            OffloadOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(resampled["values"], json!([2.0, 2.0]));
}

#[tokio::test]
async fn test_handler_error_is_task_failure() {
    let (dispatcher, _, tracker) = dispatcher(config(1));

    let handle = dispatcher
        .submit(
            TaskKind::ScaleProfile,
            json!({"values": [0.0], "target_total": 5.0}),
            OffloadOptions::default(),
        )
        .unwrap();
    let job_id = handle.job_id().clone();

    match handle.wait().await {
        Err(ExecutionError::TaskFailed(message)) => assert!(message.contains("zero")),
        other => panic!("expected task failure, got {:?}", other),
    }
    assert_eq!(tracker.get(&job_id).unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn test_priority_order_on_single_worker() {
    let (dispatcher, log, _) = dispatcher(config(1));
    wait_for(&dispatcher, |s| s.idle_workers == 1).await;

    let blocker = dispatcher
        .submit(TaskKind::ProfileSummary, task("blocker", 200), OffloadOptions::default())
        .unwrap();
    wait_for(&dispatcher, |s| s.busy_workers == 1).await;

    let low = dispatcher
        .submit(
            TaskKind::ProfileSummary,
            task("low", 0),
            OffloadOptions::with_priority(Priority::Low),
        )
        .unwrap();
    let high = dispatcher
        .submit(
            TaskKind::ProfileSummary,
            task("high", 0),
            OffloadOptions::with_priority(Priority::High),
        )
        .unwrap();
    let normal = dispatcher
        .submit(TaskKind::ProfileSummary, task("normal", 0), OffloadOptions::default())
        .unwrap();

    let stats = dispatcher.stats().await;
    assert_eq!(stats.queued_tasks, 3);
    assert_eq!(stats.in_flight_tasks, 1);

    for handle in [blocker, low, high, normal] {
        handle.wait().await.unwrap();
    }
    assert_eq!(*log.lock(), vec!["blocker", "high", "normal", "low"]);
}

#[tokio::test]
async fn test_tasks_run_in_parallel() {
    let (dispatcher, log, _) = dispatcher(config(4));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            dispatcher
                .submit(
                    TaskKind::ProfileSummary,
                    task(&format!("t{}", i), 20),
                    OffloadOptions::default(),
                )
                .unwrap()
        })
        .collect();

    let results = join_all(handles.into_iter().map(|h| h.wait())).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(log.lock().len(), 8);

    let stats = wait_for(&dispatcher, |s| s.idle_workers == 4).await;
    assert_eq!(stats.current_workers, 4);
    assert_eq!(stats.in_flight_tasks, 0);
}

#[tokio::test]
async fn test_crash_while_running_fails_only_that_task() {
    let (dispatcher, log, tracker) = dispatcher(config(2));
    wait_for(&dispatcher, |s| s.idle_workers == 2).await;

    let crashing = dispatcher
        .submit(
            TaskKind::ProfileSummary,
            json!({"panic": true}),
            OffloadOptions::default(),
        )
        .unwrap();
    let crashed_id = crashing.job_id().clone();

    match crashing.wait().await {
        Err(ExecutionError::WorkerCrash { job_id, .. }) => assert_eq!(job_id, crashed_id),
        other => panic!("expected worker crash, got {:?}", other),
    }
    assert_eq!(tracker.get(&crashed_id).unwrap().state, JobState::Failed);

    let stats = wait_for(&dispatcher, |s| s.idle_workers == 2).await;
    assert_eq!(stats.current_workers, 2);

    dispatcher
        .offload(TaskKind::ProfileSummary, task("after", 0), OffloadOptions::default())
        .await
        .unwrap();
    assert_eq!(*log.lock(), vec!["after"]);
}

#[tokio::test]
async fn test_running_task_timeout_ignores_late_result() {
    let (dispatcher, log, tracker) = dispatcher(config(1));

    let handle = dispatcher
        .submit(
            TaskKind::ProfileSummary,
            task("slow", 300),
            OffloadOptions::default().timeout(Duration::from_millis(50)),
        )
        .unwrap();
    let job_id = handle.job_id().clone();

    let started = Instant::now();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ExecutionError::Timeout { timeout_ms: 50, .. }));
    assert!(started.elapsed() < Duration::from_millis(250));

    // The worker finishes the abandoned task, then becomes available again
    let stats = wait_for(&dispatcher, |s| s.idle_workers == 1).await;
    assert_eq!(stats.in_flight_tasks, 0);
    assert_eq!(*log.lock(), vec!["slow"]);
    assert_eq!(tracker.get(&job_id).unwrap().state, JobState::TimedOut);

    dispatcher
        .offload(TaskKind::ProfileSummary, task("next", 0), OffloadOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_queued_task_timeout_is_withdrawn() {
    let (dispatcher, log, _) = dispatcher(config(1));
    wait_for(&dispatcher, |s| s.idle_workers == 1).await;

    let blocker = dispatcher
        .submit(TaskKind::ProfileSummary, task("blocker", 300), OffloadOptions::default())
        .unwrap();
    wait_for(&dispatcher, |s| s.busy_workers == 1).await;

    let queued = dispatcher
        .offload(
            TaskKind::ProfileSummary,
            task("queued", 0),
            OffloadOptions::default().timeout(Duration::from_millis(50)),
        )
        .await;
    assert_eq!(queued.unwrap_err().kind(), "timeout");
    assert_eq!(dispatcher.stats().await.queued_tasks, 0);

    blocker.wait().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*log.lock(), vec!["blocker"]);
}

#[tokio::test]
async fn test_recycle_on_timeout_frees_capacity() {
    let (dispatcher, _, _) = dispatcher(DispatcherConfig {
        recycle_on_timeout: true,
        ..config(1)
    });
    wait_for(&dispatcher, |s| s.idle_workers == 1).await;

    let err = dispatcher
        .offload(
            TaskKind::ProfileSummary,
            task("stuck", 1000),
            OffloadOptions::default().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");

    // A replacement worker serves the next task without waiting for the stuck one
    let started = Instant::now();
    dispatcher
        .offload(TaskKind::ProfileSummary, task("fresh", 0), OffloadOptions::default())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(700));
    assert_eq!(dispatcher.stats().await.current_workers, 1);
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let (dispatcher, log, tracker) = dispatcher(config(1));
    wait_for(&dispatcher, |s| s.idle_workers == 1).await;

    let running = dispatcher
        .submit(TaskKind::ProfileSummary, task("running", 1500), OffloadOptions::default())
        .unwrap();
    wait_for(&dispatcher, |s| s.busy_workers == 1).await;

    let queued: Vec<_> = ["q1", "q2"]
        .iter()
        .map(|tag| {
            dispatcher
                .submit(TaskKind::ProfileSummary, task(tag, 0), OffloadOptions::default())
                .unwrap()
        })
        .collect();
    let queued_ids: Vec<_> = queued.iter().map(|h| h.job_id().clone()).collect();

    let started = Instant::now();
    let draining = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.shutdown(true).await })
    };

    // Queued tasks are rejected as soon as the drain begins
    for handle in queued {
        assert_eq!(handle.wait().await.unwrap_err().kind(), "shutdown_rejection");
    }
    assert!(started.elapsed() < Duration::from_millis(300), "took {:?}", started.elapsed());
    for id in &queued_ids {
        assert_eq!(tracker.get(id).unwrap().state, JobState::Failed);
    }

    let err = dispatcher
        .offload(TaskKind::ProfileSummary, task("late", 0), OffloadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "shutdown_rejection");
    assert!(!draining.is_finished());

    // The in-flight task was allowed to finish
    assert_eq!(running.wait().await.unwrap()["tag"], "running");
    draining.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    let stats = dispatcher.stats().await;
    assert_eq!(stats.current_workers, 0);
    assert_eq!(stats.queued_tasks, 0);
    assert_eq!(*log.lock(), vec!["running"]);
}

#[tokio::test]
async fn test_immediate_shutdown_rejects_in_flight() {
    let (dispatcher, _, _) = dispatcher(config(1));
    wait_for(&dispatcher, |s| s.idle_workers == 1).await;

    let running = dispatcher
        .submit(TaskKind::ProfileSummary, task("running", 300), OffloadOptions::default())
        .unwrap();
    wait_for(&dispatcher, |s| s.busy_workers == 1).await;

    dispatcher.shutdown(false).await;
    assert_eq!(running.wait().await.unwrap_err().kind(), "shutdown_rejection");
    assert_eq!(dispatcher.stats().await.current_workers, 0);
}
