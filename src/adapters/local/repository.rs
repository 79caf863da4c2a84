//! VideoRepository backed by the artifact store's metadata records.

use crate::domain::jobs::VideoJob;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::{ArtifactStore, StorageError};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct MetadataRepository {
    store: Arc<dyn ArtifactStore>,
}

impl MetadataRepository {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl VideoRepository for MetadataRepository {
    async fn create(
        &self,
        owner_id: &str,
        video_id: &str,
        display_title: &str,
        original_filename: &str,
    ) -> Result<VideoJob, StorageError> {
        let job = VideoJob::new(video_id, owner_id, display_title, original_filename);
        self.store.create_metadata(&job).await?;
        Ok(job)
    }

    async fn get(&self, owner_id: &str, video_id: &str) -> Result<Option<VideoJob>, StorageError> {
        Ok(self
            .store
            .get_metadata(video_id)
            .await?
            .filter(|job| job.owner_id == owner_id))
    }

    async fn save(&self, job: &VideoJob) -> Result<(), StorageError> {
        self.store.save_metadata(job).await
    }

    async fn delete(&self, job: &VideoJob) -> Result<(), StorageError> {
        self.store.delete_metadata(&job.id).await
    }

    async fn list(&self, owner_id: &str) -> Result<Vec<VideoJob>, StorageError> {
        let mut jobs = self.store.list_videos().await?;
        jobs.retain(|job| job.owner_id == owner_id);
        Ok(jobs)
    }
}
