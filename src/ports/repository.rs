use super::storage::StorageError;
use crate::domain::jobs::VideoJob;
use async_trait::async_trait;

/// Entity store for video records, scoped by owner.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Create a record in UPLOADED. Fails with `AlreadyExists` when the
    /// identifier is taken, by any owner.
    async fn create(
        &self,
        owner_id: &str,
        video_id: &str,
        display_title: &str,
        original_filename: &str,
    ) -> Result<VideoJob, StorageError>;

    /// Records of other owners are reported as absent.
    async fn get(&self, owner_id: &str, video_id: &str) -> Result<Option<VideoJob>, StorageError>;

    async fn save(&self, job: &VideoJob) -> Result<(), StorageError>;

    async fn delete(&self, job: &VideoJob) -> Result<(), StorageError>;

    async fn list(&self, owner_id: &str) -> Result<Vec<VideoJob>, StorageError>;
}
