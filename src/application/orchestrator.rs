use super::lifecycle::JobLifecycleManager;
use crate::domain::dash::manifest::{rewrite_base_url_file, segment_base_url};
use crate::domain::dash::{ffmpeg_args, manifest_name, rendition_names};
use crate::domain::jobs::{JobStatus, TransitionError, VideoJob};
use crate::domain::progress::estimate;
use crate::error::ProcessingError;
use crate::ports::storage::ArtifactStore;
use crate::ports::transcoder::TranscodeExecutor;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Minimum time between two persisted progress updates.
const PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(2);

/// Turns an uploaded file into a DASH manifest plus segments and marks the
/// job COMPLETED. Failures are returned, never recorded here.
pub struct TranscodeOrchestrator {
    store: Arc<dyn ArtifactStore>,
    executor: Arc<dyn TranscodeExecutor>,
    lifecycle: JobLifecycleManager,
    api_prefix: String,
}

impl TranscodeOrchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        executor: Arc<dyn TranscodeExecutor>,
        lifecycle: JobLifecycleManager,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            executor,
            lifecycle,
            api_prefix: api_prefix.into(),
        }
    }

    /// `job` must be PROCESSING.
    pub async fn transcode(
        &self,
        mut job: VideoJob,
        source: &Path,
    ) -> Result<VideoJob, ProcessingError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(ProcessingError::SourceMissing(source.to_path_buf()));
        }

        // 1. Output location
        let output_dir = self.store.prepare_output_dir(&job.id).await?;
        let manifest = manifest_name(&job.id);
        let manifest_path = output_dir.join(&manifest);

        // 2. Source duration, only needed for progress
        let duration = match self.executor.probe_duration(source.to_path_buf()).await {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Could not probe {}: {}", source.display(), e);
                None
            }
        };

        // 3. Transcode and package
        info!("Transcoding {} into {}", job.id, output_dir.display());
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let args = ffmpeg_args(source, &manifest_path);
        let (output, ()) = tokio::join!(
            self.executor.transcode(args, Some(progress_tx)),
            self.track_progress(job.clone(), progress_rx, duration)
        );
        let output = output.map_err(ProcessingError::Spawn)?;
        if !output.success() {
            return Err(ProcessingError::TranscodeFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        if !tokio::fs::try_exists(&manifest_path).await.unwrap_or(false) {
            return Err(ProcessingError::MissingManifest(manifest_path));
        }

        // 4. Point segment URLs at this service
        let base_url = segment_base_url(&self.api_prefix, &job.id);
        rewrite_base_url_file(&manifest_path, &base_url).await?;
        debug!("Rewrote BaseURL of {} to {}", manifest_path.display(), base_url);

        // 5. Artifacts are in place; publish them
        self.lifecycle
            .complete(&mut job, &manifest, rendition_names())
            .await?;
        if job.status != JobStatus::Completed {
            return Err(TransitionError {
                id: job.id.clone(),
                from: job.status,
                to: JobStatus::Completed,
            }
            .into());
        }
        info!("Video {} is ready", job.id);
        Ok(job)
    }

    /// Persist throttled progress estimates until the transcoder hangs up.
    async fn track_progress(
        &self,
        mut job: VideoJob,
        mut positions: mpsc::UnboundedReceiver<f64>,
        duration: Option<f64>,
    ) {
        let started = Instant::now();
        let mut last_saved: Option<Instant> = None;

        while let Some(position) = positions.recv().await {
            let Some(total) = duration else { continue };
            if last_saved.is_some_and(|at| at.elapsed() < PROGRESS_SAVE_INTERVAL) {
                continue;
            }
            let Some(estimate) = estimate(position, total, started.elapsed()) else {
                continue;
            };
            match self.lifecycle.record_progress(&mut job, estimate).await {
                Ok(_) => last_saved = Some(Instant::now()),
                Err(e) => warn!("Could not record progress for {}: {}", job.id, e),
            }
        }
    }
}
