//! Accepts an upload: sanitize, validate, persist, enqueue.

use super::lifecycle::JobLifecycleManager;
use crate::domain::jobs::{JobStatus, TranscodeTask, VideoJob};
use crate::domain::sanitize::sanitize_title;
use crate::domain::validator::VideoValidator;
use crate::error::AppError;
use crate::ports::queue::TaskQueue;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::{ArtifactStore, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::{error, info};
use uuid::Uuid;

/// Body of the `202 Accepted` upload response.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub message: String,
    pub title: String,
    pub display_title: String,
    pub task_id: String,
    pub status: JobStatus,
}

pub struct UploadService {
    repo: Arc<dyn VideoRepository>,
    store: Arc<dyn ArtifactStore>,
    queue: Arc<dyn TaskQueue>,
    lifecycle: JobLifecycleManager,
    validator: VideoValidator,
}

impl UploadService {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        store: Arc<dyn ArtifactStore>,
        queue: Arc<dyn TaskQueue>,
        lifecycle: JobLifecycleManager,
        validator: VideoValidator,
    ) -> Self {
        Self {
            repo,
            store,
            queue,
            lifecycle,
            validator,
        }
    }

    pub fn validator(&self) -> &VideoValidator {
        &self.validator
    }

    /// Register `reader` as a new video of `owner_id` and queue its
    /// transcode. Nothing is persisted unless validation passes.
    pub async fn upload<R>(
        &self,
        owner_id: &str,
        title: &str,
        original_filename: &str,
        reader: &mut R,
        size: u64,
    ) -> Result<UploadReceipt, AppError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let mut job = self
            .register(owner_id, title, original_filename, reader, size)
            .await?;
        let saved = self
            .store
            .save_temp_upload(&job.id, original_filename, reader)
            .await;
        self.dispatch(&mut job, saved).await
    }

    /// Like [`UploadService::upload`] for a body already spooled to disk.
    /// The store takes the file over instead of copying it.
    pub async fn upload_staged(
        &self,
        owner_id: &str,
        title: &str,
        original_filename: &str,
        staged: &Path,
        size: u64,
    ) -> Result<UploadReceipt, AppError> {
        let mut file = fs::File::open(staged)
            .await
            .map_err(|e| AppError::Unexpected(format!("reopening staged upload: {}", e)))?;
        let mut job = self
            .register(owner_id, title, original_filename, &mut file, size)
            .await?;
        drop(file);
        let saved = self
            .store
            .adopt_temp_upload(&job.id, original_filename, staged)
            .await;
        self.dispatch(&mut job, saved).await
    }

    /// Validate the upload and create its record as UPLOADED.
    async fn register<R>(
        &self,
        owner_id: &str,
        title: &str,
        original_filename: &str,
        reader: &mut R,
        size: u64,
    ) -> Result<VideoJob, AppError>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let display_title = title.trim();
        if display_title.is_empty() {
            return Err(AppError::invalid("title", "This field is required."));
        }
        let video_id = sanitize_title(display_title);

        self.validator.validate(reader, size).await?;

        // Atomic create-if-absent; a taken identifier is a 409.
        let job = self
            .repo
            .create(owner_id, &video_id, display_title, original_filename)
            .await?;
        Ok(job)
    }

    /// Queue the stored upload, or record why the job cannot proceed.
    async fn dispatch(
        &self,
        job: &mut VideoJob,
        saved: Result<PathBuf, StorageError>,
    ) -> Result<UploadReceipt, AppError> {
        let source_path = match saved {
            Ok(path) => path,
            Err(e) => {
                self.abandon(job, &format!("could not store upload: {}", e))
                    .await;
                return Err(e.into());
            }
        };

        let task_id = Uuid::new_v4().to_string();
        let task = TranscodeTask {
            video_id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            source_path: source_path.clone(),
        };

        // QUEUED is recorded before a worker can see the task.
        let queued = match self.lifecycle.mark_queued(job, &task_id).await {
            Ok(_) => self.queue.enqueue(&task_id, task).await.map_err(AppError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = queued {
            self.abandon(job, &format!("could not queue transcode: {}", e))
                .await;
            if let Err(e) = self.store.cleanup_temp_file(&source_path).await {
                error!("Could not remove temp upload {}: {}", source_path.display(), e);
            }
            return Err(e);
        }

        info!("Accepted upload {} as task {}", job.id, task_id);
        Ok(UploadReceipt {
            message: "Video upload accepted and queued for processing".to_string(),
            title: job.id.clone(),
            display_title: job.display_title.clone(),
            task_id,
            status: JobStatus::Queued,
        })
    }

    async fn abandon(&self, job: &mut VideoJob, detail: &str) {
        if let Err(e) = self.lifecycle.fail_job(job, detail).await {
            error!("Could not record failure of {}: {}", job.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::{FsArtifactStore, MetadataRepository};
    use crate::domain::validator::ValidationError;
    use crate::ports::queue::{QueueError, TaskOutcome};
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingQueue {
        fail: bool,
        enqueued: Mutex<Vec<(String, TranscodeTask)>>,
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, task_id: &str, task: TranscodeTask) -> Result<(), QueueError> {
            if self.fail {
                return Err(QueueError::Closed);
            }
            self.enqueued
                .lock()
                .unwrap()
                .push((task_id.to_string(), task));
            Ok(())
        }

        async fn status(&self, _task_id: &str) -> Result<Option<TaskOutcome>, QueueError> {
            Ok(None)
        }

        async fn revoke(&self, _task_id: &str) -> Result<bool, QueueError> {
            Ok(false)
        }
    }

    struct Fixture {
        dir: TempDir,
        repo: Arc<MetadataRepository>,
        queue: Arc<RecordingQueue>,
        service: UploadService,
    }

    fn fixture(queue: RecordingQueue, max_size: u64) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::new(dir.path()));
        let repo = Arc::new(MetadataRepository::new(store.clone()));
        let queue = Arc::new(queue);
        let service = UploadService::new(
            repo.clone(),
            store,
            queue.clone(),
            JobLifecycleManager::new(repo.clone()),
            VideoValidator::new(max_size),
        );
        Fixture {
            dir,
            repo,
            queue,
            service,
        }
    }

    fn mp4_bytes() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0u8; 64]);
        bytes
    }

    async fn upload(f: &Fixture, title: &str, bytes: Vec<u8>) -> Result<UploadReceipt, AppError> {
        let size = bytes.len() as u64;
        let mut reader = Cursor::new(bytes);
        f.service
            .upload("alice", title, "clip.mp4", &mut reader, size)
            .await
    }

    #[tokio::test]
    async fn test_accepted_upload_is_queued() {
        let f = fixture(RecordingQueue::default(), 1 << 20);
        let receipt = upload(&f, "My Clip", mp4_bytes()).await.unwrap();

        assert_eq!(receipt.title, "my_clip");
        assert_eq!(receipt.display_title, "My Clip");
        assert_eq!(receipt.status, JobStatus::Queued);

        let stored = f.repo.get("alice", "my_clip").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.task_id.as_deref(), Some(receipt.task_id.as_str()));

        let enqueued = f.queue.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].0, receipt.task_id);
        let source = &enqueued[0].1.source_path;
        assert_eq!(std::fs::read(source).unwrap(), mp4_bytes());
    }

    #[tokio::test]
    async fn test_second_upload_with_same_identifier_conflicts() {
        let f = fixture(RecordingQueue::default(), 1 << 20);
        upload(&f, "My Clip", mp4_bytes()).await.unwrap();
        let err = upload(&f, "MY CLIP", mp4_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(id) if id == "my_clip"));
        assert_eq!(f.queue.enqueued.lock().unwrap().len(), 1);

        let stored = f.repo.get("alice", "my_clip").await.unwrap().unwrap();
        assert_eq!(stored.display_title, "My Clip");
    }

    #[tokio::test]
    async fn test_invalid_uploads_persist_nothing() {
        let f = fixture(RecordingQueue::default(), 1 << 20);

        let err = upload(&f, "Notes", b"just some text".to_vec()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidVideo(ValidationError::UnsupportedType { .. })
        ));

        let err = upload(&f, "   ", mp4_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { field: "title", .. }));

        let big = fixture(RecordingQueue::default(), 16);
        let err = upload(&big, "Big", mp4_bytes()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidVideo(ValidationError::Oversized { .. })
        ));

        assert!(f.repo.list("alice").await.unwrap().is_empty());
        assert!(!f.dir.path().join("temp_uploads").exists());
    }

    #[tokio::test]
    async fn test_staged_upload_is_moved_not_copied() {
        let f = fixture(RecordingQueue::default(), 1 << 20);
        let staged = f.dir.path().join("upload-1");
        std::fs::write(&staged, mp4_bytes()).unwrap();

        let receipt = f
            .service
            .upload_staged("alice", "My Clip", "clip.mp4", &staged, mp4_bytes().len() as u64)
            .await
            .unwrap();
        assert_eq!(receipt.title, "my_clip");
        assert!(!staged.exists());

        let enqueued = f.queue.enqueued.lock().unwrap();
        let source = &enqueued[0].1.source_path;
        assert_eq!(source, &f.dir.path().join("temp_uploads/my_clip_clip.mp4"));
        assert_eq!(std::fs::read(source).unwrap(), mp4_bytes());
    }

    #[tokio::test]
    async fn test_invalid_staged_upload_stays_put() {
        let f = fixture(RecordingQueue::default(), 1 << 20);
        let staged = f.dir.path().join("upload-2");
        std::fs::write(&staged, b"just some text").unwrap();

        let err = f
            .service
            .upload_staged("alice", "Notes", "notes.txt", &staged, 14)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidVideo(_)));
        // The caller still owns (and removes) the staged file.
        assert!(staged.exists());
        assert!(f.repo.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_fails_the_job() {
        let f = fixture(
            RecordingQueue {
                fail: true,
                ..Default::default()
            },
            1 << 20,
        );
        let err = upload(&f, "My Clip", mp4_bytes()).await.unwrap_err();
        assert!(matches!(err, AppError::Queue(QueueError::Closed)));

        let stored = f.repo.get("alice", "my_clip").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("could not queue"));
        assert!(!f.dir.path().join("temp_uploads/my_clip_clip.mp4").exists());
    }
}
