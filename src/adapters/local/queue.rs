//! In-process task queue: a channel feeding a dispatcher that runs each
//! task on its own tokio task, at most `workers` at a time.

use crate::domain::jobs::TranscodeTask;
use crate::ports::queue::{QueueError, TaskHandler, TaskOutcome, TaskQueue, TaskState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct QueueOptions {
    pub workers: usize,
    /// Tasks still running after this long are cancelled and failed
    pub task_timeout: Option<Duration>,
    /// How long a finished task's outcome stays queryable
    pub result_ttl: Duration,
}

pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            task_timeout: None,
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

struct TaskRecord {
    video_id: String,
    state: TaskState,
    result: Option<serde_json::Value>,
    error: Option<String>,
    cancel: CancellationToken,
    /// Cancelled once the outcome is recorded and the run has been dropped.
    settled: CancellationToken,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<String, TaskRecord>,
    /// video id -> unfinished task id
    active: HashMap<String, String>,
}

impl Registry {
    /// Forget finished tasks whose outcome is older than `ttl`.
    fn evict_expired(&mut self, ttl: Duration) {
        let before = self.tasks.len();
        self.tasks.retain(|_, record| {
            !matches!(record.finished_at, Some(finished) if finished.elapsed() >= ttl)
        });
        let evicted = before - self.tasks.len();
        if evicted > 0 {
            debug!("Evicted {} expired task results", evicted);
        }
    }
}

struct QueuedTask {
    task_id: String,
    task: TranscodeTask,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    registry: Arc<Mutex<Registry>>,
    result_ttl: Duration,
}

impl LocalTaskQueue {
    /// Start the dispatcher. Must be called from within a tokio runtime.
    pub fn start(handler: Arc<dyn TaskHandler>, options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(Registry::default()));

        tokio::spawn(dispatch(receiver, handler, registry.clone(), options));
        info!("Started task queue with {} workers", options.workers.max(1));

        Self {
            sender,
            registry,
            result_ttl: options.result_ttl,
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // A panic while holding the lock leaves plain data behind; keep going.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    handler: Arc<dyn TaskHandler>,
    registry: Arc<Mutex<Registry>>,
    options: QueueOptions,
) {
    let permits = Arc::new(Semaphore::new(options.workers.max(1)));
    while let Some(queued) = receiver.recv().await {
        tokio::spawn(execute(
            queued,
            handler.clone(),
            registry.clone(),
            permits.clone(),
            options.task_timeout,
        ));
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

enum Finish {
    Success(serde_json::Value),
    Failure(String),
    Revoked(String),
}

async fn execute(
    queued: QueuedTask,
    handler: Arc<dyn TaskHandler>,
    registry: Arc<Mutex<Registry>>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
) {
    let QueuedTask {
        task_id,
        task,
        cancel,
    } = queued;

    let finish = tokio::select! {
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => {
                let finish = run_started(&task_id, &task, &cancel, &handler, &registry, timeout).await;
                drop(permit);
                finish
            }
            Err(_) => Finish::Failure("task queue is shut down".to_string()),
        },
        _ = cancel.cancelled() => Finish::Revoked("task revoked before start".to_string()),
    };

    let (state, result, error) = match finish {
        Finish::Success(value) => {
            info!("Task {} for {} succeeded", task_id, task.video_id);
            (TaskState::Success, Some(value), None)
        }
        Finish::Failure(message) => {
            warn!("Task {} for {} failed: {}", task_id, task.video_id, message);
            handler.on_failure(&task_id, &task, &message).await;
            (TaskState::Failure, None, Some(message))
        }
        Finish::Revoked(message) => {
            warn!("Task {} for {} revoked", task_id, task.video_id);
            handler.on_failure(&task_id, &task, &message).await;
            (TaskState::Revoked, None, Some(message))
        }
    };

    let mut registry = lock(&registry);
    if registry.active.get(&task.video_id) == Some(&task_id) {
        registry.active.remove(&task.video_id);
    }
    if let Some(record) = registry.tasks.get_mut(&task_id) {
        record.state = state;
        record.result = result;
        record.error = error;
        record.finished_at = Some(Instant::now());
        record.settled.cancel();
    }
}

async fn run_started(
    task_id: &str,
    task: &TranscodeTask,
    cancel: &CancellationToken,
    handler: &Arc<dyn TaskHandler>,
    registry: &Mutex<Registry>,
    timeout: Option<Duration>,
) -> Finish {
    if cancel.is_cancelled() {
        return Finish::Revoked("task revoked before start".to_string());
    }
    if let Some(record) = lock(registry).tasks.get_mut(task_id) {
        record.state = TaskState::Started;
    }

    let mut handle = {
        let handler = handler.clone();
        let task_id = task_id.to_string();
        let task = task.clone();
        tokio::spawn(async move { handler.run(&task_id, &task).await })
    };

    let finish = tokio::select! {
        joined = &mut handle => {
            return match joined {
                Ok(Ok(value)) => Finish::Success(value),
                Ok(Err(e)) => Finish::Failure(e.to_string()),
                Err(e) if e.is_panic() => {
                    error!("Task {} panicked", task_id);
                    Finish::Failure(format!("worker crashed: {}", panic_message(e.into_panic())))
                }
                Err(_) => Finish::Failure("worker was cancelled".to_string()),
            };
        }
        _ = cancel.cancelled() => Finish::Revoked("task revoked while processing".to_string()),
        _ = deadline(timeout) => Finish::Failure(format!(
            "task timed out after {:?}",
            timeout.unwrap_or_default()
        )),
    };

    // Wait for the aborted run to be dropped so its cleanup has happened.
    handle.abort();
    let _ = handle.await;
    finish
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task_id: &str, task: TranscodeTask) -> Result<(), QueueError> {
        let cancel = CancellationToken::new();
        {
            let mut registry = lock(&self.registry);
            registry.evict_expired(self.result_ttl);
            if registry.tasks.contains_key(task_id) {
                return Err(QueueError::DuplicateTask(task_id.to_string()));
            }
            if registry.active.contains_key(&task.video_id) {
                return Err(QueueError::Duplicate(task.video_id));
            }
            registry
                .active
                .insert(task.video_id.clone(), task_id.to_string());
            registry.tasks.insert(
                task_id.to_string(),
                TaskRecord {
                    video_id: task.video_id.clone(),
                    state: TaskState::Pending,
                    result: None,
                    error: None,
                    cancel: cancel.clone(),
                    settled: CancellationToken::new(),
                    finished_at: None,
                },
            );
        }

        let video_id = task.video_id.clone();
        let queued = QueuedTask {
            task_id: task_id.to_string(),
            task,
            cancel,
        };
        if self.sender.send(queued).is_err() {
            let mut registry = lock(&self.registry);
            registry.tasks.remove(task_id);
            registry.active.remove(&video_id);
            return Err(QueueError::Closed);
        }
        info!("Queued task {} for {}", task_id, video_id);
        Ok(())
    }

    async fn status(&self, task_id: &str) -> Result<Option<TaskOutcome>, QueueError> {
        let mut registry = lock(&self.registry);
        registry.evict_expired(self.result_ttl);
        Ok(registry.tasks.get(task_id).map(|record| TaskOutcome {
            task_id: task_id.to_string(),
            status: record.state,
            result: record.result.clone(),
            error: record.error.clone(),
        }))
    }

    async fn revoke(&self, task_id: &str) -> Result<bool, QueueError> {
        let settled = {
            let registry = lock(&self.registry);
            match registry.tasks.get(task_id) {
                Some(record) if !record.state.is_ready() => {
                    info!("Revoking task {} for {}", task_id, record.video_id);
                    record.cancel.cancel();
                    record.settled.clone()
                }
                _ => return Ok(false),
            }
        };
        settled.cancelled().await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessingError;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct ScriptedHandler {
        runs: AtomicUsize,
        failures: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        async fn run(
            &self,
            _task_id: &str,
            task: &TranscodeTask,
        ) -> Result<serde_json::Value, ProcessingError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match task.video_id.as_str() {
                "ok" => Ok(json!({ "title": "ok" })),
                "boom" => panic!("decoder exploded"),
                "hang" => std::future::pending().await,
                other => Err(ProcessingError::JobNotFound(other.to_string())),
            }
        }

        async fn on_failure(&self, task_id: &str, _task: &TranscodeTask, error: &str) {
            self.failures
                .lock()
                .unwrap()
                .push((task_id.to_string(), error.to_string()));
        }
    }

    fn task(video_id: &str) -> TranscodeTask {
        TranscodeTask {
            video_id: video_id.to_string(),
            owner_id: "alice".to_string(),
            source_path: PathBuf::from("/tmp/none.mp4"),
        }
    }

    async fn submit(queue: &LocalTaskQueue, video_id: &str) -> String {
        let task_id = Uuid::new_v4().to_string();
        queue.enqueue(&task_id, task(video_id)).await.unwrap();
        task_id
    }

    async fn wait_for(queue: &LocalTaskQueue, task_id: &str, state: TaskState) -> TaskOutcome {
        for _ in 0..500 {
            let outcome = queue.status(task_id).await.unwrap().unwrap();
            if outcome.status == state {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", task_id, state);
    }

    #[tokio::test]
    async fn test_success_records_result() {
        let handler = Arc::new(ScriptedHandler::default());
        let queue = LocalTaskQueue::start(handler.clone(), QueueOptions::default());

        let id = submit(&queue, "ok").await;
        let outcome = wait_for(&queue, &id, TaskState::Success).await;
        assert_eq!(outcome.result, Some(json!({ "title": "ok" })));
        assert!(outcome.error.is_none());
        assert!(handler.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_runs_callback() {
        let handler = Arc::new(ScriptedHandler::default());
        let queue = LocalTaskQueue::start(handler.clone(), QueueOptions::default());

        let id = submit(&queue, "missing").await;
        let outcome = wait_for(&queue, &id, TaskState::Failure).await;
        assert_eq!(outcome.error.as_deref(), Some("video missing not found"));
        let failures = handler.failures.lock().unwrap();
        assert_eq!(failures.as_slice(), &[(id.clone(), "video missing not found".to_string())]);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_a_failure() {
        let handler = Arc::new(ScriptedHandler::default());
        let queue = LocalTaskQueue::start(handler.clone(), QueueOptions::default());

        let id = submit(&queue, "boom").await;
        let outcome = wait_for(&queue, &id, TaskState::Failure).await;
        assert!(outcome.error.unwrap().contains("decoder exploded"));
        assert_eq!(handler.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_the_task() {
        let handler = Arc::new(ScriptedHandler::default());
        let options = QueueOptions {
            workers: 1,
            task_timeout: Some(Duration::from_millis(50)),
            ..QueueOptions::default()
        };
        let queue = LocalTaskQueue::start(handler.clone(), options);

        let id = submit(&queue, "hang").await;
        let outcome = wait_for(&queue, &id, TaskState::Failure).await;
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_one_active_task_per_video() {
        let handler = Arc::new(ScriptedHandler::default());
        let queue = LocalTaskQueue::start(handler.clone(), QueueOptions::default());

        let id = submit(&queue, "hang").await;
        assert!(matches!(
            queue.enqueue("another", task("hang")).await,
            Err(QueueError::Duplicate(v)) if v == "hang"
        ));
        assert!(matches!(
            queue.enqueue(&id, task("ok")).await,
            Err(QueueError::DuplicateTask(_))
        ));

        assert!(queue.revoke(&id).await.unwrap());
        wait_for(&queue, &id, TaskState::Revoked).await;
        // Finished tasks free the slot.
        let again = submit(&queue, "hang").await;
        assert_ne!(again, id);
        queue.revoke(&again).await.unwrap();
    }

    #[tokio::test]
    async fn test_revoke_pending_and_running() {
        let handler = Arc::new(ScriptedHandler::default());
        let options = QueueOptions {
            workers: 1,
            ..QueueOptions::default()
        };
        let queue = LocalTaskQueue::start(handler.clone(), options);

        let running = submit(&queue, "hang").await;
        wait_for(&queue, &running, TaskState::Started).await;
        let pending = submit(&queue, "ok").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            queue.status(&pending).await.unwrap().unwrap().status,
            TaskState::Pending
        );

        assert!(queue.revoke(&pending).await.unwrap());
        wait_for(&queue, &pending, TaskState::Revoked).await;
        assert!(queue.revoke(&running).await.unwrap());
        wait_for(&queue, &running, TaskState::Revoked).await;

        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(handler.failures.lock().unwrap().len(), 2);
        assert!(!queue.revoke(&running).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_returns_once_settled() {
        let handler = Arc::new(ScriptedHandler::default());
        let queue = LocalTaskQueue::start(handler.clone(), QueueOptions::default());

        let id = submit(&queue, "hang").await;
        wait_for(&queue, &id, TaskState::Started).await;
        assert!(queue.revoke(&id).await.unwrap());

        // No polling: the outcome and the failure callback are already in.
        let outcome = queue.status(&id).await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskState::Revoked);
        assert_eq!(handler.failures.lock().unwrap().len(), 1);
        let again = submit(&queue, "hang").await;
        queue.revoke(&again).await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_results_expire() {
        let handler = Arc::new(ScriptedHandler::default());
        let options = QueueOptions {
            result_ttl: Duration::from_millis(50),
            ..QueueOptions::default()
        };
        let queue = LocalTaskQueue::start(handler.clone(), options);

        let done = submit(&queue, "ok").await;
        wait_for(&queue, &done, TaskState::Success).await;
        let running = submit(&queue, "hang").await;
        wait_for(&queue, &running, TaskState::Started).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(queue.status(&done).await.unwrap().is_none());
        // Unfinished tasks never expire.
        assert!(queue.status(&running).await.unwrap().is_some());
        assert_eq!(lock(&queue.registry).tasks.len(), 1);
        queue.revoke(&running).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let handler = Arc::new(ScriptedHandler::default());
        let queue = LocalTaskQueue::start(handler, QueueOptions::default());
        assert!(queue.status("nope").await.unwrap().is_none());
        assert!(!queue.revoke("nope").await.unwrap());
    }
}
