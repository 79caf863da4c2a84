use crate::domain::jobs::VideoJob;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("corrupted metadata for {id}: {source}")]
    Corrupted {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Owns the layout of temporary uploads, packaged output and job metadata.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist an upload for `video_id`, replacing any previous one.
    async fn save_temp_upload(
        &self,
        video_id: &str,
        original_filename: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PathBuf, StorageError>;

    /// Take over an upload already spooled to `staged`, moving it instead
    /// of copying when the filesystem allows.
    async fn adopt_temp_upload(
        &self,
        video_id: &str,
        original_filename: &str,
        staged: &Path,
    ) -> Result<PathBuf, StorageError>;

    /// Remove a temporary upload. Missing files are not an error.
    async fn cleanup_temp_file(&self, path: &Path) -> Result<(), StorageError>;

    /// Write the record only if none exists for `job.id` yet.
    async fn create_metadata(&self, job: &VideoJob) -> Result<(), StorageError>;

    async fn save_metadata(&self, job: &VideoJob) -> Result<(), StorageError>;

    /// `Ok(None)` when unknown, `Err(Corrupted)` when unreadable.
    async fn get_metadata(&self, video_id: &str) -> Result<Option<VideoJob>, StorageError>;

    async fn delete_metadata(&self, video_id: &str) -> Result<(), StorageError>;

    async fn list_videos(&self) -> Result<Vec<VideoJob>, StorageError>;

    /// Directory the packager writes `video_id`'s manifest and segments to.
    /// Created if missing.
    async fn prepare_output_dir(&self, video_id: &str) -> Result<PathBuf, StorageError>;

    async fn manifest_path(&self, video_id: &str) -> Result<PathBuf, StorageError>;

    async fn segment_path(&self, video_id: &str, name: &str) -> Result<PathBuf, StorageError>;

    /// Best-effort removal of metadata, manifest and segments.
    async fn delete_video(&self, video_id: &str) -> Result<(), StorageError>;
}
