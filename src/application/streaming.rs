//! Authorizes and opens manifests and segments for delivery.

use crate::domain::dash::segments::{classify, ArtifactKind};
use crate::domain::jobs::{JobStatus, VideoJob};
use crate::error::AppError;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::{ArtifactStore, StorageError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tracing::debug;

pub enum ArtifactBody {
    /// Open file to stream, with its length
    File { file: File, len: u64 },
    /// Internal location for a fronting proxy to serve (`X-Accel-Redirect`)
    Redirect(String),
}

pub struct ServedArtifact {
    pub kind: ArtifactKind,
    pub body: ArtifactBody,
}

/// Hands delivery of files under `dash_root` to a proxy serving that
/// directory at `prefix`.
#[derive(Clone, Debug)]
pub struct AccelRedirect {
    pub prefix: String,
    pub dash_root: PathBuf,
}

impl AccelRedirect {
    fn location(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.dash_root).ok()?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?),
                _ => return None,
            }
        }
        Some(format!(
            "{}/{}",
            self.prefix.trim_end_matches('/'),
            parts.join("/")
        ))
    }
}

pub struct SegmentServer {
    repo: Arc<dyn VideoRepository>,
    store: Arc<dyn ArtifactStore>,
    accel: Option<AccelRedirect>,
}

impl SegmentServer {
    pub fn new(repo: Arc<dyn VideoRepository>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            repo,
            store,
            accel: None,
        }
    }

    pub fn with_accel_redirect(mut self, accel: Option<AccelRedirect>) -> Self {
        self.accel = accel;
        self
    }

    /// The owner's job, if it finished successfully. Anything else is
    /// indistinguishable from a missing video.
    async fn ready_job(&self, owner_id: &str, video_id: &str) -> Result<VideoJob, AppError> {
        match self.repo.get(owner_id, video_id).await? {
            Some(job) if job.status == JobStatus::Completed => Ok(job),
            _ => Err(AppError::NotFound),
        }
    }

    pub async fn manifest(&self, owner_id: &str, video_id: &str) -> Result<ServedArtifact, AppError> {
        let job = self.ready_job(owner_id, video_id).await?;
        let path = self.store.manifest_path(&job.id).await?;
        self.open(ArtifactKind::Manifest, path).await
    }

    pub async fn segment(
        &self,
        owner_id: &str,
        video_id: &str,
        name: &str,
    ) -> Result<ServedArtifact, AppError> {
        let Some(kind) = classify(video_id, name) else {
            debug!("Refusing to serve {:?} for {}", name, video_id);
            return Err(AppError::NotFound);
        };
        let job = self.ready_job(owner_id, video_id).await?;
        let path = self.store.segment_path(&job.id, name).await?;
        self.open(kind, path).await
    }

    async fn open(&self, kind: ArtifactKind, path: PathBuf) -> Result<ServedArtifact, AppError> {
        if let Some(location) = self.accel.as_ref().and_then(|a| a.location(&path)) {
            return Ok(ServedArtifact {
                kind,
                body: ArtifactBody::Redirect(location),
            });
        }

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(AppError::NotFound),
            Err(e) => return Err(StorageError::Io(e).into()),
        };
        let len = file.metadata().await.map_err(StorageError::Io)?.len();
        Ok(ServedArtifact {
            kind,
            body: ArtifactBody::File { file, len },
        })
    }
}
