#![cfg(unix)]

use gridrun_config::ProcessPoolConfig;
use gridrun_execution::{
    ExecuteOptions, ExecutionError, JobEvent, JobId, JobState, JobTracker, ProcessPool,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    pool: ProcessPool,
}

fn fixture(max_concurrent: usize, scripts: &[(&str, &str)]) -> Fixture {
    let dir = TempDir::new().unwrap();
    for (name, body) in scripts {
        std::fs::write(dir.path().join(name), body).unwrap();
    }
    let config = ProcessPoolConfig {
        max_concurrent,
        scripts_dir: dir.path().to_path_buf(),
        interpreter: "sh".to_string(),
        kill_grace: Duration::from_millis(300),
        ..Default::default()
    };
    let pool = ProcessPool::new(config, Arc::new(JobTracker::default())).unwrap();
    Fixture { dir, pool }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None).is_ok()
}

#[tokio::test]
async fn test_result_and_progress_in_order() {
    let fx = fixture(
        2,
        &[(
            "steps.sh",
            r#"for i in 1 2 3 4 5 6 7 8 9 10; do echo "PROGRESS:{\"step\":$i}"; done
echo '{"status":"ok","arg":"'"$1"'"}'
"#,
        )],
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = ExecuteOptions::new().with_progress(move |data| sink.lock().push(data));

    let result = fx
        .pool
        .execute("steps.sh", &args(&["north"]), options)
        .await
        .unwrap();
    assert_eq!(result, json!({"status": "ok", "arg": "north"}));

    let steps: Vec<i64> = seen
        .lock()
        .iter()
        .map(|p| p["step"].as_i64().unwrap())
        .collect();
    assert_eq!(steps, (1..=10).collect::<Vec<_>>());

    // Nothing arrives once the job has settled
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().len(), 10);
    assert_eq!(fx.pool.stats().active, 0);
}

#[tokio::test]
async fn test_environment_and_working_directory() {
    let fx = fixture(
        1,
        &[(
            "env.sh",
            r#"echo "{\"cwd\":\"$(pwd -P)\",\"path\":\"$PYTHONPATH\",\"unbuffered\":\"$PYTHONUNBUFFERED\"}""#,
        )],
    );

    let result = fx
        .pool
        .execute("env.sh", &[], ExecuteOptions::new())
        .await
        .unwrap();

    let canonical = std::fs::canonicalize(fx.dir.path()).unwrap();
    let cwd = std::fs::canonicalize(result["cwd"].as_str().unwrap()).unwrap();
    let path = std::fs::canonicalize(result["path"].as_str().unwrap()).unwrap();
    assert_eq!(cwd, canonical);
    assert_eq!(path, canonical);
    assert_eq!(result["unbuffered"], "1");
}

#[tokio::test]
async fn test_non_zero_exit_carries_stderr() {
    let fx = fixture(
        1,
        &[("fail.sh", "echo 'Traceback: solver failed' >&2\nexit 3\n")],
    );

    match fx.pool.execute("fail.sh", &[], ExecuteOptions::new()).await {
        Err(ExecutionError::NonZeroExit { code, stderr }) => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("solver failed"));
        }
        other => panic!("expected non-zero exit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_output() {
    let fx = fixture(1, &[("noise.sh", "echo 'loading model'\necho 'done'\n")]);

    let err = fx
        .pool
        .execute("noise.sh", &[], ExecuteOptions::new())
        .await
        .unwrap_err();
    match err {
        ExecutionError::MalformedOutput { output, .. } => assert!(output.contains("loading model")),
        other => panic!("expected malformed output, got {:?}", other),
    }
}

#[tokio::test]
async fn test_admission_is_capped() {
    let fx = fixture(1, &[("slow.sh", "sleep 10\n"), ("fast.sh", "echo '{}'\n")]);

    let first = fx.pool.submit("slow.sh", &[], ExecuteOptions::new()).unwrap();
    let err = fx
        .pool
        .submit("fast.sh", &[], ExecuteOptions::new())
        .unwrap_err();
    assert_eq!(err, ExecutionError::CapacityExceeded { max: 1 });
    assert!(err.is_retryable());

    let stats = fx.pool.stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.active_jobs, vec![first.job_id().clone()]);

    assert!(fx.pool.cancel(first.job_id()));
    assert_eq!(fx.pool.stats().active, 0);
    assert!(fx.pool.execute("fast.sh", &[], ExecuteOptions::new()).await.is_ok());
}

#[tokio::test]
async fn test_timeout_rejects_promptly() {
    let fx = fixture(1, &[("sleep.sh", "sleep 10\n")]);

    let started = Instant::now();
    let options = ExecuteOptions::new().with_timeout(Duration::from_millis(100));
    let err = fx.pool.execute("sleep.sh", &[], options).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, ExecutionError::Timeout { timeout_ms: 100, .. }));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    // The slot is free without waiting for the process to die
    assert_eq!(fx.pool.stats().active, 0);
}

#[tokio::test]
async fn test_timeout_escalates_to_kill() {
    let fx = fixture(
        1,
        &[(
            "stubborn.sh",
            "trap '' TERM\necho \"PROGRESS:{\\\"pid\\\":$$}\"\nwhile :; do sleep 0.05; done\n",
        )],
    );

    let pid = Arc::new(Mutex::new(None));
    let sink = pid.clone();
    let options = ExecuteOptions::new()
        .with_timeout(Duration::from_millis(200))
        .with_progress(move |data| *sink.lock() = data["pid"].as_i64());

    let err = fx.pool.execute("stubborn.sh", &[], options).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");

    let pid = (*pid.lock()).expect("script reported its pid") as i32;
    // Grace window is 300ms; allow scheduling slack on top
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!process_alive(pid), "pid {} survived the kill escalation", pid);
}

#[tokio::test]
async fn test_cancel_settles_once() {
    let fx = fixture(2, &[("sleep.sh", "sleep 10\n")]);

    let handle = fx.pool.submit("sleep.sh", &[], ExecuteOptions::new()).unwrap();
    let job_id = handle.job_id().clone();

    assert!(fx.pool.cancel(&job_id));
    assert!(!fx.pool.cancel(&job_id));
    assert!(!fx.pool.cancel(&JobId::new()));

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err, ExecutionError::Cancelled(job_id.clone()));
    assert_eq!(
        fx.pool.tracker().get(&job_id).unwrap().state,
        JobState::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_racing_timeout_has_one_winner() {
    let fx = fixture(1, &[("sleep.sh", "sleep 10\n")]);

    let options = ExecuteOptions::new().with_timeout(Duration::from_millis(50));
    let handle = fx.pool.submit("sleep.sh", &[], options).unwrap();
    let job_id = handle.job_id().clone();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = fx.pool.cancel(&job_id);
    let result = handle.wait().await;

    if cancelled {
        assert_eq!(result, Err(ExecutionError::Cancelled(job_id)));
    } else {
        assert_eq!(result.unwrap_err().kind(), "timeout");
    }
    assert_eq!(fx.pool.stats().active, 0);
}

#[tokio::test]
async fn test_rejects_scripts_outside_directory() {
    let fx = fixture(1, &[("ok.sh", "echo '{}'\n")]);

    for script in ["../ok.sh", "/bin/sh", "missing.sh"] {
        let err = fx
            .pool
            .submit(script, &[], ExecuteOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_script", "accepted {}", script);
    }
    assert_eq!(fx.pool.stats().active, 0);
}

#[tokio::test]
async fn test_caller_supplied_job_id() {
    let fx = fixture(2, &[("sleep.sh", "sleep 10\n")]);
    let id: JobId = "forecast-2024".parse().unwrap();

    let handle = fx
        .pool
        .submit("sleep.sh", &[], ExecuteOptions::new().with_job_id(id.clone()))
        .unwrap();
    assert_eq!(handle.job_id(), &id);

    let err = fx
        .pool
        .submit("sleep.sh", &[], ExecuteOptions::new().with_job_id(id.clone()))
        .unwrap_err();
    assert_eq!(err, ExecutionError::DuplicateJob(id.clone()));

    fx.pool.cancel(&id);
    let _ = handle.wait().await;
}

#[tokio::test]
async fn test_tracker_sees_lifecycle() {
    let fx = fixture(
        1,
        &[("report.sh", "echo 'PROGRESS:{\"pct\":50}'\necho '{\"ok\":1}'\n")],
    );
    let mut events = fx.pool.tracker().subscribe();

    let handle = fx.pool.submit("report.sh", &[], ExecuteOptions::new()).unwrap();
    let job_id = handle.job_id().clone();
    handle.wait().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id(), &job_id);
        seen.push(event);
    }

    let states: Vec<JobState> = seen
        .iter()
        .filter_map(|e| match e {
            JobEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![JobState::Queued, JobState::Running, JobState::Completed]
    );
    assert!(seen.contains(&JobEvent::Progress {
        job_id: job_id.clone(),
        data: json!({"pct": 50})
    }));
}

#[tokio::test]
async fn test_shutdown_cancels_and_refuses() {
    let fx = fixture(2, &[("sleep.sh", "sleep 10\n")]);

    let a = fx.pool.submit("sleep.sh", &[], ExecuteOptions::new()).unwrap();
    let b = fx.pool.submit("sleep.sh", &[], ExecuteOptions::new()).unwrap();

    assert_eq!(fx.pool.shutdown(), 2);
    assert_eq!(a.wait().await.unwrap_err().kind(), "cancelled");
    assert_eq!(b.wait().await.unwrap_err().kind(), "cancelled");

    let err = fx
        .pool
        .submit("sleep.sh", &[], ExecuteOptions::new())
        .unwrap_err();
    assert_eq!(err.kind(), "shutdown_rejection");
}

#[tokio::test]
async fn test_panicking_progress_callback_frees_slot() {
    let fx = fixture(
        1,
        &[("report.sh", "echo 'PROGRESS:{\"pct\":10}'\necho '{\"ok\":1}'\n")],
    );

    let options = ExecuteOptions::new().with_progress(|_| panic!("progress sink failed"));
    let handle = fx.pool.submit("report.sh", &[], options).unwrap();
    let job_id = handle.job_id().clone();

    assert_eq!(handle.wait().await.unwrap_err().kind(), "internal");
    assert_eq!(fx.pool.stats().active, 0);
    assert_eq!(
        fx.pool.tracker().get(&job_id).unwrap().state,
        JobState::Failed
    );

    let result = fx
        .pool
        .execute("report.sh", &[], ExecuteOptions::new())
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": 1}));
}

#[tokio::test]
async fn test_unbounded_timeout_never_fires() {
    let fx = fixture(1, &[("ok.sh", "echo '{\"ok\":1}'\n")]);

    for _ in 0..2 {
        let options = ExecuteOptions::new().with_timeout(Duration::MAX);
        let result = fx.pool.execute("ok.sh", &[], options).await.unwrap();
        assert_eq!(result, json!({"ok": 1}));
    }
    assert_eq!(fx.pool.stats().active, 0);
}
