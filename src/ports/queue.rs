use crate::domain::jobs::TranscodeTask;
use crate::error::ProcessingError;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("a task is already active for video {0}")]
    Duplicate(String),
    #[error("task {0} already exists")]
    DuplicateTask(String),
    #[error("task queue is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
    Revoked,
}

impl TaskState {
    pub fn is_ready(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure | TaskState::Revoked)
    }
}

/// What the queue knows about one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs transcode tasks away from the request path.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Accept `task` under the caller-chosen handle `task_id`. At most one
    /// unfinished task per video is accepted.
    async fn enqueue(&self, task_id: &str, task: TranscodeTask) -> Result<(), QueueError>;

    async fn status(&self, task_id: &str) -> Result<Option<TaskOutcome>, QueueError>;

    /// Cancel a pending or running task and wait until it has settled: its
    /// outcome is recorded, the failure callback has run and the handler has
    /// been dropped. Returns false if it already finished or is unknown.
    async fn revoke(&self, task_id: &str) -> Result<bool, QueueError>;
}

/// The worker side of a [`TaskQueue`].
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(
        &self,
        task_id: &str,
        task: &TranscodeTask,
    ) -> Result<serde_json::Value, ProcessingError>;

    /// Called by the queue whenever a task ends without success: error,
    /// panic, timeout or revocation.
    async fn on_failure(&self, task_id: &str, task: &TranscodeTask, error: &str);
}
