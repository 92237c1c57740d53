//! Config and component builders shared by the integration tests.

use analysis_core::config::BackoffKind;
use analysis_core::execution::{InFlightRegistry, WorkerContext};
use analysis_core::{
    AnalysisEngine, AnalysisTask, EngineConfig, InMemoryProgressTracker, InMemoryResultRepository,
    InMemoryTaskQueue, Notifier, RetryPolicy, TaskRepository, TaskStatus, WorkerPoolManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fast polling, immediate retries, quick persistence retries
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.worker.poll_interval_ms = 20;
    config.worker.stuck_grace_ms = 100;
    config.worker.stop_timeout_ms = 2_000;
    config.worker.persist_retry_attempts = 3;
    config.worker.persist_retry_delay_ms = 5;
    config.pool.initial_workers = 2;
    config.pool.max_workers = 8;
    config.pool.maintenance_interval_secs = 3_600;
    config.pool.expired_task_grace_secs = 0;
    config.retry.backoff = BackoffKind::Fixed;
    config.retry.base_delay_ms = 0;
    config
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("analysis_core=debug")
        .with_test_writer()
        .try_init();
}

/// Worker context over concrete in-memory collaborators the test can inspect
pub struct TestHarness {
    pub ctx: WorkerContext,
    pub queue: Arc<InMemoryTaskQueue>,
    pub tasks: Arc<dyn TaskRepository>,
    pub results: Arc<InMemoryResultRepository>,
    pub progress: Arc<InMemoryProgressTracker>,
}

impl TestHarness {
    pub fn new(engine: Arc<dyn AnalysisEngine>) -> Self {
        Self::with_config(engine, &test_config())
    }

    pub fn with_config(engine: Arc<dyn AnalysisEngine>, config: &EngineConfig) -> Self {
        Self::with_repository(
            engine,
            config,
            Arc::new(analysis_core::InMemoryTaskRepository::new()),
        )
    }

    pub fn with_repository(
        engine: Arc<dyn AnalysisEngine>,
        config: &EngineConfig,
        tasks: Arc<dyn TaskRepository>,
    ) -> Self {
        let policy: Arc<dyn RetryPolicy> =
            Arc::new(config.retry.build_policy().expect("valid retry config"));
        Self::with_policy(engine, config, tasks, policy)
    }

    pub fn with_policy(
        engine: Arc<dyn AnalysisEngine>,
        config: &EngineConfig,
        tasks: Arc<dyn TaskRepository>,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self::with_queue(engine, config, tasks, retry_policy, Arc::new(InMemoryTaskQueue::new()))
    }

    pub fn with_queue(
        engine: Arc<dyn AnalysisEngine>,
        config: &EngineConfig,
        tasks: Arc<dyn TaskRepository>,
        retry_policy: Arc<dyn RetryPolicy>,
        queue: Arc<InMemoryTaskQueue>,
    ) -> Self {
        let results = Arc::new(InMemoryResultRepository::new());
        let progress = Arc::new(InMemoryProgressTracker::new(config.progress.ttl()));
        let ctx = WorkerContext {
            queue: queue.clone(),
            progress: progress.clone(),
            tasks: tasks.clone(),
            results: results.clone(),
            notifier: Arc::new(Notifier::default()),
            retry_policy,
            engine,
            in_flight: Arc::new(InFlightRegistry::new()),
            config: config.worker.clone(),
            shutdown: CancellationToken::new(),
        };
        Self {
            ctx,
            queue,
            tasks,
            results,
            progress,
        }
    }

    /// Harness over a bounded queue
    pub fn with_queue_capacity(engine: Arc<dyn AnalysisEngine>, capacity: usize) -> Self {
        let config = test_config();
        let policy: Arc<dyn RetryPolicy> =
            Arc::new(config.retry.build_policy().expect("valid retry config"));
        Self::with_queue(
            engine,
            &config,
            Arc::new(analysis_core::InMemoryTaskRepository::new()),
            policy,
            Arc::new(InMemoryTaskQueue::with_capacity(capacity)),
        )
    }

    pub fn pool(&self, max_workers: usize) -> WorkerPoolManager {
        WorkerPoolManager::new(self.ctx.clone(), max_workers)
    }

    /// Persist as pending and enqueue, the way the engine core submits
    pub async fn submit(&self, task: AnalysisTask) {
        self.tasks.create(&task).await.expect("create task");
        analysis_core::TaskQueue::push(self.queue.as_ref(), task)
            .await
            .expect("enqueue task");
    }

    pub async fn status_of(&self, task_id: &str) -> TaskStatus {
        self.tasks.get_by_id(task_id).await.expect("task exists").status
    }

    /// Poll until the task reaches `status`; false on timeout
    pub async fn wait_for_status(&self, task_id: &str, status: TaskStatus, timeout: Duration) -> bool {
        wait_for_status(self.tasks.as_ref(), task_id, status, timeout).await
    }
}

pub async fn wait_for_status(
    tasks: &dyn TaskRepository,
    task_id: &str,
    status: TaskStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(task) = tasks.get_by_id(task_id).await {
            if task.status == status {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a synchronous condition until it holds; false on timeout
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
