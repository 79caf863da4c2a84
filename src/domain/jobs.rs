use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Error detail recorded when a failure arrives without any text.
const UNKNOWN_FAILURE: &str = "processing failed without diagnostic output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Uploaded => "UPLOADED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Uploaded, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Uploaded, Failed)
                | (Queued, Failed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: String,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// The persisted record of one upload and its transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    /// Sanitized identifier, also the storage key
    pub id: String,
    pub owner_id: String,
    pub display_title: String,
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub processed: bool,
    /// Manifest file name, relative to the job's output directory
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Best-effort percentage, 0.0 to 100.0
    #[serde(default)]
    pub progress: Option<f32>,
    /// Best-effort estimate in seconds
    #[serde(default)]
    pub estimated_time_remaining: Option<u64>,
    #[serde(default)]
    pub resolutions: Vec<String>,
}

impl VideoJob {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        display_title: impl Into<String>,
        original_filename: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            display_title: display_title.into(),
            original_filename: original_filename.into(),
            uploaded_at: Utc::now(),
            status: JobStatus::Uploaded,
            task_id: None,
            processed: false,
            manifest: None,
            error: None,
            processing_started_at: None,
            completed_at: None,
            progress: None,
            estimated_time_remaining: None,
            resolutions: Vec::new(),
        }
    }

    fn check(&self, next: JobStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to: next,
            })
        }
    }

    pub fn mark_queued(&mut self, task_id: impl Into<String>) -> Result<(), TransitionError> {
        self.check(JobStatus::Queued)?;
        self.status = JobStatus::Queued;
        self.task_id = Some(task_id.into());
        Ok(())
    }

    pub fn mark_processing(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.processing_started_at = Some(at);
        self.progress = Some(0.0);
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        manifest: impl Into<String>,
        resolutions: Vec<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.processed = true;
        self.manifest = Some(manifest.into());
        self.resolutions = resolutions;
        self.completed_at = Some(at);
        self.progress = Some(100.0);
        self.estimated_time_remaining = Some(0);
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, detail: &str, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(JobStatus::Failed)?;
        let detail = detail.trim();
        self.status = JobStatus::Failed;
        self.processed = false;
        self.manifest = None;
        self.error = Some(if detail.is_empty() {
            UNKNOWN_FAILURE.to_string()
        } else {
            detail.to_string()
        });
        self.completed_at = Some(at);
        self.estimated_time_remaining = None;
        Ok(())
    }

    /// Record best-effort progress. Ignored outside of PROCESSING.
    pub fn record_progress(&mut self, percent: f32, remaining_secs: Option<u64>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.progress = Some(percent.clamp(0.0, 100.0));
        self.estimated_time_remaining = remaining_secs;
        true
    }

    /// A PROCESSING job whose worker has not reported back within `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match (self.status, self.processing_started_at) {
            (JobStatus::Processing, Some(started)) => now - started > timeout,
            _ => false,
        }
    }

    /// `processed` is set exactly when the job completed with a manifest.
    pub fn is_consistent(&self) -> bool {
        let completed = self.status == JobStatus::Completed && self.manifest.is_some();
        let failed_ok = self.status != JobStatus::Failed
            || self.error.as_deref().is_some_and(|e| !e.trim().is_empty());
        self.processed == completed
            && (self.manifest.is_some() == (self.status == JobStatus::Completed))
            && failed_ok
    }
}

/// Work item handed to the task queue for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeTask {
    pub video_id: String,
    pub owner_id: String,
    pub source_path: PathBuf,
}
