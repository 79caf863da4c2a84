use super::lifecycle::JobLifecycleManager;
use super::orchestrator::TranscodeOrchestrator;
use crate::domain::jobs::{JobStatus, TransitionError, TranscodeTask, VideoJob};
use crate::error::ProcessingError;
use crate::ports::queue::TaskHandler;
use crate::ports::storage::ArtifactStore;
use async_trait::async_trait;
use serde_json::json;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Removes the temp upload when dropped, unless released first.
struct TempUpload {
    path: Option<PathBuf>,
}

impl TempUpload {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    async fn release(mut self, store: &dyn ArtifactStore) {
        if let Some(path) = self.path.take() {
            if let Err(e) = store.cleanup_temp_file(&path).await {
                warn!("Could not remove temp upload {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        // Reached on cancellation and panics, where nothing can be awaited.
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove temp upload {}: {}", path.display(), e),
            }
        }
    }
}

/// Task handler running one transcode per queued upload.
pub struct TranscodeWorker {
    store: Arc<dyn ArtifactStore>,
    lifecycle: JobLifecycleManager,
    orchestrator: TranscodeOrchestrator,
    api_prefix: String,
}

impl TranscodeWorker {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        lifecycle: JobLifecycleManager,
        orchestrator: TranscodeOrchestrator,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            orchestrator,
            api_prefix: api_prefix.into(),
        }
    }

    fn result_payload(&self, job: &VideoJob) -> serde_json::Value {
        json!({
            "processed": job.processed,
            "status": "success",
            "title": job.id,
            "processing_completed": job.completed_at,
            "message": "Video processing completed successfully",
            "mpd_url": format!("{}/videos/{}/mpd", self.api_prefix, job.id),
        })
    }

    async fn process(&self, task: &TranscodeTask) -> Result<VideoJob, ProcessingError> {
        let mut job = self.lifecycle.load(&task.owner_id, &task.video_id).await?;
        self.lifecycle.start_processing(&mut job).await?;
        if job.status != JobStatus::Processing {
            return Err(TransitionError {
                id: job.id.clone(),
                from: job.status,
                to: JobStatus::Processing,
            }
            .into());
        }
        self.orchestrator.transcode(job, &task.source_path).await
    }
}

#[async_trait]
impl TaskHandler for TranscodeWorker {
    async fn run(
        &self,
        task_id: &str,
        task: &TranscodeTask,
    ) -> Result<serde_json::Value, ProcessingError> {
        let temp = TempUpload::new(task.source_path.clone());
        info!("Task {}: processing {}", task_id, task.video_id);

        let outcome = self.process(task).await;
        temp.release(self.store.as_ref()).await;

        match outcome {
            Ok(job) => Ok(self.result_payload(&job)),
            Err(e) => {
                error!("Task {}: {} failed: {}", task_id, task.video_id, e);
                if let Err(storage) = self
                    .lifecycle
                    .fail(&task.owner_id, &task.video_id, &e.to_string())
                    .await
                {
                    error!("Could not record failure of {}: {}", task.video_id, storage);
                }
                Err(e)
            }
        }
    }

    async fn on_failure(&self, task_id: &str, task: &TranscodeTask, error: &str) {
        match self
            .lifecycle
            .fail(&task.owner_id, &task.video_id, error)
            .await
        {
            Ok(true) => info!("Task {}: marked {} as failed", task_id, task.video_id),
            Ok(false) => {}
            Err(e) => error!("Could not record failure of {}: {}", task.video_id, e),
        }
        // A task revoked before it started never ran its own cleanup.
        if let Err(e) = self.store.cleanup_temp_file(&task.source_path).await {
            warn!("Could not remove temp upload {}: {}", task.source_path.display(), e);
        }
    }
}
