//! Read and delete operations on a caller's videos and tasks.

use crate::domain::jobs::{JobStatus, VideoJob};
use crate::error::AppError;
use crate::ports::queue::{TaskOutcome, TaskQueue};
use crate::ports::repository::VideoRepository;
use crate::ports::storage::ArtifactStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Public view of a video job.
#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub display_title: String,
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: JobStatus,
    pub processed: bool,
    pub manifest: Option<String>,
    pub mpd_url: Option<String>,
    pub task_id: Option<String>,
    pub error: Option<String>,
    pub resolutions: Vec<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VideoInfo {
    pub fn new(job: VideoJob, api_prefix: &str) -> Self {
        let mpd_url = job
            .manifest
            .as_ref()
            .map(|_| format!("{}/videos/{}/mpd", api_prefix, job.id));
        Self {
            title: job.id.clone(),
            id: job.id,
            display_title: job.display_title,
            original_filename: job.original_filename,
            uploaded_at: job.uploaded_at,
            status: job.status,
            processed: job.processed,
            manifest: job.manifest,
            mpd_url,
            task_id: job.task_id,
            error: job.error,
            resolutions: job.resolutions,
            processing_started_at: job.processing_started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub status: JobStatus,
    pub progress: Option<f32>,
    pub estimated_time_remaining: Option<u64>,
}

pub struct VideoService {
    repo: Arc<dyn VideoRepository>,
    store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn TaskQueue>,
    api_prefix: String,
}

impl VideoService {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn TaskQueue>,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            store,
            queue,
            api_prefix: api_prefix.into(),
        }
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<VideoInfo>, AppError> {
        let jobs = self.repo.list(owner_id).await?;
        Ok(jobs
            .into_iter()
            .map(|job| VideoInfo::new(job, &self.api_prefix))
            .collect())
    }

    async fn job(&self, owner_id: &str, video_id: &str) -> Result<VideoJob, AppError> {
        self.repo
            .get(owner_id, video_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn info(&self, owner_id: &str, video_id: &str) -> Result<VideoInfo, AppError> {
        let job = self.job(owner_id, video_id).await?;
        Ok(VideoInfo::new(job, &self.api_prefix))
    }

    pub async fn progress(&self, owner_id: &str, video_id: &str) -> Result<ProgressReport, AppError> {
        let job = self.job(owner_id, video_id).await?;
        Ok(ProgressReport {
            status: job.status,
            progress: job.progress,
            estimated_time_remaining: job.estimated_time_remaining,
        })
    }

    /// Remove the job and everything it produced. An unfinished transcode
    /// is revoked first, and nothing is removed until it has stopped.
    pub async fn delete(&self, owner_id: &str, video_id: &str) -> Result<(), AppError> {
        let job = self.job(owner_id, video_id).await?;

        if !job.status.is_terminal() {
            if let Some(task_id) = &job.task_id {
                match self.queue.revoke(task_id).await {
                    Ok(true) => info!("Revoked task {} of deleted video {}", task_id, job.id),
                    Ok(false) => {}
                    Err(e) => warn!("Could not revoke task {}: {}", task_id, e),
                }
            }
        }

        self.store.delete_video(&job.id).await?;
        self.repo.delete(&job).await?;
        info!("Deleted video {}", job.id);
        Ok(())
    }

    pub async fn task_status(&self, task_id: &str) -> Result<TaskOutcome, AppError> {
        self.queue.status(task_id).await?.ok_or(AppError::NotFound)
    }
}
