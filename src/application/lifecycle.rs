//! Every status change of a video job goes through here, so the record on
//! disk only ever moves forward through the lifecycle.

use crate::domain::jobs::{TransitionError, VideoJob};
use crate::domain::progress::ProgressEstimate;
use crate::error::ProcessingError;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::StorageError;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct JobLifecycleManager {
    repo: Arc<dyn VideoRepository>,
}

impl JobLifecycleManager {
    pub fn new(repo: Arc<dyn VideoRepository>) -> Self {
        Self { repo }
    }

    pub async fn load(&self, owner_id: &str, video_id: &str) -> Result<VideoJob, ProcessingError> {
        self.repo
            .get(owner_id, video_id)
            .await?
            .ok_or_else(|| ProcessingError::JobNotFound(video_id.to_string()))
    }

    /// Apply `change` and persist. A rejected transition leaves the record
    /// untouched and is reported as `Ok(false)`.
    async fn apply<F>(&self, job: &mut VideoJob, change: F) -> Result<bool, StorageError>
    where
        F: FnOnce(&mut VideoJob) -> Result<(), TransitionError>,
    {
        let before = job.status;
        match change(job) {
            Ok(()) => {
                self.repo.save(job).await?;
                info!("Video {}: {} -> {}", job.id, before, job.status);
                Ok(true)
            }
            Err(e) => {
                warn!("Ignoring transition: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn mark_queued(&self, job: &mut VideoJob, task_id: &str) -> Result<bool, StorageError> {
        self.apply(job, |job| job.mark_queued(task_id)).await
    }

    pub async fn start_processing(&self, job: &mut VideoJob) -> Result<bool, StorageError> {
        self.apply(job, |job| job.mark_processing(Utc::now())).await
    }

    pub async fn complete(
        &self,
        job: &mut VideoJob,
        manifest: &str,
        resolutions: Vec<String>,
    ) -> Result<bool, StorageError> {
        self.apply(job, |job| job.mark_completed(manifest, resolutions, Utc::now()))
            .await
    }

    pub async fn fail_job(&self, job: &mut VideoJob, detail: &str) -> Result<bool, StorageError> {
        self.apply(job, |job| job.mark_failed(detail, Utc::now())).await
    }

    /// Fail the stored record of `video_id`. Used from failure callbacks,
    /// which only carry identifiers; already finished jobs stay as they are.
    pub async fn fail(&self, owner_id: &str, video_id: &str, detail: &str) -> Result<bool, StorageError> {
        match self.repo.get(owner_id, video_id).await? {
            Some(mut job) => self.fail_job(&mut job, detail).await,
            None => {
                warn!("Cannot fail unknown video {}", video_id);
                Ok(false)
            }
        }
    }

    /// Store a progress estimate on a PROCESSING job.
    pub async fn record_progress(
        &self,
        job: &mut VideoJob,
        estimate: ProgressEstimate,
    ) -> Result<bool, StorageError> {
        if !job.record_progress(estimate.percent, estimate.remaining_secs) {
            return Ok(false);
        }
        self.repo.save(job).await?;
        Ok(true)
    }
}
