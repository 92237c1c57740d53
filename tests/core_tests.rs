//! End-to-end behavior of the engine core: submission, callbacks, cancellation,
//! maintenance and shutdown.

mod common;

use analysis_core::constants::events;
use analysis_core::{
    AnalysisCore, AnalysisError, AnalysisProgress, AnalysisTask, AnalysisType, CallbackHandler,
    EngineConfig, ErrorCategory, InMemoryProgressTracker, InMemoryTaskQueue,
    InMemoryTaskRepository, ProgressTracker, TaskQueue, TaskRepository, TaskRequest, TaskStatus,
};
use common::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct CoreFixture {
    core: AnalysisCore,
    tasks: Arc<InMemoryTaskRepository>,
    queue: Arc<InMemoryTaskQueue>,
}

fn fixture(engine: ScriptedEngine, config: EngineConfig) -> CoreFixture {
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let queue = Arc::new(InMemoryTaskQueue::new());
    let core = AnalysisCore::builder(Arc::new(engine))
        .with_config(config)
        .with_task_repository(tasks.clone())
        .with_queue(queue.clone())
        .build()
        .expect("valid core");
    CoreFixture { core, tasks, queue }
}

fn request(id: &str, analysis_type: &str) -> TaskRequest {
    TaskRequest {
        id: Some(id.to_string()),
        alert_id: Some("alert-42".to_string()),
        analysis_type: Some(analysis_type.to_string()),
        priority: Some(3),
        payload: json!({"service": "checkout", "severity": "critical"}),
        ..TaskRequest::default()
    }
}

#[tokio::test]
async fn test_submitted_request_is_analyzed_end_to_end() {
    init_test_logging();
    let CoreFixture { core, tasks, .. } = fixture(ScriptedEngine::succeeding(), test_config());
    let mut events_rx = core.subscribe();

    let completed = Arc::new(AtomicUsize::new(0));
    let progress_seen = Arc::new(Mutex::new(Vec::<u8>::new()));
    {
        let completed = completed.clone();
        core.register_callback(
            "e2e-1",
            CallbackHandler::on_completed(move |task, result| {
                assert_eq!(task.id, result.task_id);
                completed.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let progress_seen = progress_seen.clone();
        core.register_callback(
            "e2e-1",
            CallbackHandler::on_progress(move |progress| progress_seen.lock().push(progress.progress)),
        );
    }

    let submitted = core
        .submit_request(request("e2e-1", "root_cause"))
        .await
        .expect("submit");
    assert_eq!(submitted.status, TaskStatus::Pending);
    assert_eq!(submitted.priority, 3);
    assert_eq!(submitted.max_retries, 3);

    core.start().await.expect("start");
    assert!(wait_for_status(tasks.as_ref(), "e2e-1", TaskStatus::Completed, WAIT).await);
    assert!(eventually(WAIT, || completed.load(Ordering::SeqCst) == 1).await);
    assert!(progress_seen.lock().contains(&10));

    let result = core.get_result("e2e-1").await.expect("result");
    assert_eq!(result.analysis_type, AnalysisType::RootCause);
    let by_alert = core.get_results_by_alert("alert-42").await.expect("results");
    assert_eq!(by_alert.len(), 1);
    assert_eq!(core.get_progress("e2e-1").await.expect("progress").progress, 100);

    let status = core.queue_status().await.expect("queue status");
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.completed_count, 1);
    assert_eq!(status.failed_count, 0);

    let completion = tokio::time::timeout(WAIT, async {
        loop {
            let event = events_rx.recv().await.expect("event stream open");
            if event.name == events::TASK_COMPLETED {
                return event;
            }
        }
    })
    .await
    .expect("completion event");
    assert_eq!(completion.task_id, "e2e-1");

    core.shutdown(Duration::from_secs(2)).await.expect("shutdown");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let CoreFixture { core, .. } = fixture(ScriptedEngine::succeeding(), test_config());

    let missing_type = TaskRequest {
        id: Some("no-type".to_string()),
        ..TaskRequest::default()
    };
    assert!(matches!(
        core.submit_request(missing_type).await,
        Err(AnalysisError::InvalidTask(_))
    ));
    assert!(matches!(
        core.submit_request(request("bad-type", "astrology")).await,
        Err(AnalysisError::InvalidTask(_))
    ));
    let missing_id = TaskRequest {
        analysis_type: Some("correlation".to_string()),
        ..TaskRequest::default()
    };
    assert!(matches!(
        core.submit_request(missing_id).await,
        Err(AnalysisError::InvalidTask(_))
    ));

    let mut claimed = AnalysisTask::new("not-new", "a", AnalysisType::Custom);
    claimed.mark_processing().expect("claim");
    assert!(matches!(
        core.submit_task(claimed).await,
        Err(AnalysisError::InvalidTask(_))
    ));
    assert!(core.get_task("no-type").await.is_err());
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() {
    let CoreFixture { core, queue, .. } = fixture(ScriptedEngine::succeeding(), test_config());
    core.submit_request(request("dup", "correlation"))
        .await
        .expect("first submit");
    assert!(matches!(
        core.submit_request(request("dup", "correlation")).await,
        Err(AnalysisError::InvalidTask(_))
    ));
    assert_eq!(queue.size().await.expect("size"), 1);
}

#[tokio::test]
async fn test_per_type_retry_budget_applies_to_requests() {
    let mut config = test_config();
    config.retry.default_max_retries = 4;
    config.retry.per_type.insert("anomaly_detection".to_string(), 1);
    let CoreFixture { core, .. } = fixture(ScriptedEngine::succeeding(), config);

    let anomaly = core
        .submit_request(request("per-type", "anomaly_detection"))
        .await
        .expect("submit");
    assert_eq!(anomaly.max_retries, 1);

    let default = core
        .submit_request(request("default-type", "impact_assessment"))
        .await
        .expect("submit");
    assert_eq!(default.max_retries, 4);

    let explicit = core
        .submit_request(TaskRequest {
            max_retries: Some(7),
            timeout_ms: Some(1_500),
            ..request("explicit", "anomaly_detection")
        })
        .await
        .expect("submit");
    assert_eq!(explicit.max_retries, 7);
    assert_eq!(explicit.timeout, Duration::from_millis(1_500));
}

#[tokio::test]
async fn test_cancel_pending_task() {
    init_test_logging();
    let CoreFixture { core, queue, .. } = fixture(ScriptedEngine::succeeding(), test_config());
    core.submit_request(request("withdraw", "custom"))
        .await
        .expect("submit");

    let failures = Arc::new(Mutex::new(Vec::<ErrorCategory>::new()));
    {
        let failures = failures.clone();
        core.register_callback(
            "withdraw",
            CallbackHandler::on_failed(move |_, error| failures.lock().push(error.category())),
        );
    }

    core.cancel_task("withdraw").await.expect("cancel");
    assert_eq!(
        core.get_task("withdraw").await.expect("task").status,
        TaskStatus::Cancelled
    );
    assert_eq!(queue.size().await.expect("size"), 0);
    assert_eq!(*failures.lock(), vec![ErrorCategory::Cancelled]);
    assert_eq!(core.get_progress("withdraw").await.expect("progress").stage, "cancelled");

    // cancelling again is a no-op and does not notify twice
    core.cancel_task("withdraw").await.expect("second cancel");
    assert_eq!(failures.lock().len(), 1);

    let unknown = core.cancel_task("never-submitted").await;
    assert!(matches!(unknown, Err(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn test_cancel_in_flight_task_interrupts_attempt() {
    init_test_logging();
    let engine = ScriptedEngine::succeeding()
        .with_task("long", Behavior::Succeed(Duration::from_secs(10)));
    let mut config = test_config();
    config.pool.initial_workers = 1;
    let CoreFixture { core, tasks, .. } = fixture(engine, config);

    core.start().await.expect("start");
    core.submit_request(TaskRequest {
        timeout_ms: Some(60_000),
        ..request("long", "root_cause")
    })
    .await
    .expect("submit");
    assert!(wait_for_status(tasks.as_ref(), "long", TaskStatus::Processing, WAIT).await);

    core.cancel_task("long").await.expect("cancel");
    assert_eq!(core.get_task("long").await.expect("task").status, TaskStatus::Cancelled);

    // the worker goes idle again without recording anything for the task
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let statuses = core.worker_statuses().await;
        if statuses.iter().all(|s| s.current_task_id.is_none()) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "worker never released the task");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(core.get_result("long").await.is_err());
    assert_eq!(core.get_task("long").await.expect("task").status, TaskStatus::Cancelled);
    core.health_check().await.expect("worker still healthy");

    core.shutdown(Duration::from_secs(2)).await.expect("shutdown");
}

#[tokio::test]
async fn test_progress_expires_after_ttl() {
    let progress = Arc::new(InMemoryProgressTracker::new(Duration::from_millis(50)));
    let core = AnalysisCore::builder(Arc::new(ScriptedEngine::succeeding()))
        .with_config(test_config())
        .with_progress_tracker(progress.clone())
        .build()
        .expect("core");

    progress
        .update_progress("t1", AnalysisProgress::new("t1", "processing", 50, "halfway"))
        .await
        .expect("update");
    assert_eq!(core.get_progress("t1").await.expect("progress").progress, 50);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let expired = core.get_progress("t1").await;
    assert!(matches!(expired, Err(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn test_maintenance_recovers_orphaned_processing_task() {
    init_test_logging();
    let CoreFixture { core, tasks, queue } = fixture(ScriptedEngine::succeeding(), test_config());
    core.submit_task(
        AnalysisTask::new("orphan", "alert-9", AnalysisType::Correlation)
            .with_timeout(Duration::from_millis(10)),
    )
    .await
    .expect("submit");

    // claimed by a worker that vanished without resolving it
    let mut claimed = queue.pop().await.expect("pop").expect("task");
    claimed.mark_processing().expect("claim");
    tasks.update(&claimed).await.expect("persist claim");
    tokio::time::sleep(Duration::from_millis(30)).await;

    let report = core.run_maintenance().await;
    assert_eq!(report.expired_tasks_recovered, 1);

    let recovered = core.get_task("orphan").await.expect("task");
    assert_eq!(recovered.status, TaskStatus::Pending);
    assert_eq!(recovered.retry_count, 1);
    assert_eq!(queue.size().await.expect("size"), 1);

    let again = core.run_maintenance().await;
    assert_eq!(again.expired_tasks_recovered, 0);
}

#[tokio::test]
async fn test_maintenance_requeues_stranded_pending_task() {
    init_test_logging();
    let mut config = test_config();
    config.pool.stranded_task_grace_secs = 0;
    let CoreFixture { core, tasks, queue } = fixture(ScriptedEngine::succeeding(), config);

    // pending in the repository, but its push back onto the queue never landed
    tasks
        .create(&AnalysisTask::new("stranded", "alert-3", AnalysisType::RootCause))
        .await
        .expect("create");
    core.submit_task(AnalysisTask::new("queued", "alert-3", AnalysisType::RootCause))
        .await
        .expect("submit");

    let report = core.run_maintenance().await;
    assert_eq!(report.stranded_tasks_requeued, 1);
    assert!(queue.contains("stranded").await.expect("contains"));
    assert_eq!(queue.size().await.expect("size"), 2);

    let again = core.run_maintenance().await;
    assert_eq!(again.stranded_tasks_requeued, 0);
    assert_eq!(queue.size().await.expect("size"), 2);
}

#[tokio::test]
async fn test_shutdown_abandons_running_attempt() {
    init_test_logging();
    let engine = ScriptedEngine::new(Behavior::Succeed(Duration::from_secs(10)));
    let mut config = test_config();
    config.pool.initial_workers = 1;
    let CoreFixture { core, tasks, .. } = fixture(engine, config);

    core.start().await.expect("start");
    // a second start is a no-op
    core.start().await.expect("idempotent start");
    core.submit_request(TaskRequest {
        timeout_ms: Some(60_000),
        ..request("interrupted", "root_cause")
    })
    .await
    .expect("submit");
    assert!(wait_for_status(tasks.as_ref(), "interrupted", TaskStatus::Processing, WAIT).await);

    core.shutdown(Duration::from_millis(50)).await.expect("shutdown");

    let task = core.get_task("interrupted").await.expect("task");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert!(core.health_check().await.is_err());
    assert_eq!(core.worker_metrics().await.total_workers, 0);
    assert!(matches!(
        core.start().await,
        Err(AnalysisError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_unregistered_callback_is_not_invoked() {
    let CoreFixture { core, tasks, .. } = fixture(ScriptedEngine::succeeding(), test_config());
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        core.register_callback(
            "quiet",
            CallbackHandler::on_completed(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    assert!(core.unregister_callback("quiet"));
    assert!(!core.unregister_callback("quiet"));

    core.submit_request(request("quiet", "root_cause"))
        .await
        .expect("submit");
    core.start().await.expect("start");
    assert!(wait_for_status(tasks.as_ref(), "quiet", TaskStatus::Completed, WAIT).await);
    core.shutdown(Duration::from_secs(2)).await.expect("shutdown");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
