//! HTTP inbound adapter: the JSON API plus manifest/segment delivery.

mod handlers;

use crate::adapters::local::{
    FsArtifactStore, LocalTaskQueue, MetadataRepository, QueueOptions,
};
use crate::application::lifecycle::JobLifecycleManager;
use crate::application::orchestrator::TranscodeOrchestrator;
use crate::application::streaming::{AccelRedirect, SegmentServer};
use crate::application::upload::UploadService;
use crate::application::videos::VideoService;
use crate::application::worker::TranscodeWorker;
use crate::config::AppConfig;
use crate::domain::validator::VideoValidator;
use crate::ports::queue::TaskQueue;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::ArtifactStore;
use crate::ports::transcoder::TranscodeExecutor;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Request header carrying the authenticated owner, set by the fronting proxy.
pub const OWNER_HEADER: &str = "x-owner-id";

const STAGING_DIR: &str = "staging";

#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub videos: Arc<VideoService>,
    pub segments: Arc<SegmentServer>,
    pub default_owner: String,
    /// Where multipart uploads are spooled before validation
    pub staging_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl AppState {
    /// Wire the local adapters and start the task queue. Must be called from
    /// within a tokio runtime.
    pub fn from_config(config: &AppConfig, executor: Arc<dyn TranscodeExecutor>) -> io::Result<Self> {
        let fs_store = FsArtifactStore::new(&config.media_root);
        let dash_root = fs_store.dash_root();
        let staging_dir = config.media_root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging_dir)?;

        // 1. Adapters
        let store: Arc<dyn ArtifactStore> = Arc::new(fs_store);
        let repo: Arc<dyn VideoRepository> = Arc::new(MetadataRepository::new(store.clone()));
        let lifecycle = JobLifecycleManager::new(repo.clone());

        // 2. Worker side
        let orchestrator = TranscodeOrchestrator::new(
            store.clone(),
            executor,
            lifecycle.clone(),
            &config.api_prefix,
        );
        let worker = TranscodeWorker::new(
            store.clone(),
            lifecycle.clone(),
            orchestrator,
            &config.api_prefix,
        );
        let queue: Arc<dyn TaskQueue> = Arc::new(LocalTaskQueue::start(
            Arc::new(worker),
            QueueOptions {
                workers: config.worker_count,
                task_timeout: config.task_timeout,
                result_ttl: config.task_result_ttl,
            },
        ));

        // 3. Request side
        let uploads = UploadService::new(
            repo.clone(),
            store.clone(),
            queue.clone(),
            lifecycle,
            VideoValidator::new(config.max_upload_bytes),
        );
        let videos = VideoService::new(repo.clone(), store.clone(), queue, &config.api_prefix);
        let accel = config
            .accel_redirect_prefix
            .as_ref()
            .map(|prefix| AccelRedirect {
                prefix: prefix.clone(),
                dash_root,
            });
        let segments = SegmentServer::new(repo, store).with_accel_redirect(accel);

        Ok(Self {
            uploads: Arc::new(uploads),
            videos: Arc::new(videos),
            segments: Arc::new(segments),
            default_owner: config.default_owner.clone(),
            staging_dir,
            max_upload_bytes: config.max_upload_bytes,
        })
    }
}

pub fn router(state: AppState, api_prefix: &str) -> Router {
    let api = Router::new()
        .route("/videos", get(handlers::list_videos))
        .route("/videos/upload", post(handlers::upload_video))
        .route(
            "/videos/:id",
            get(handlers::video_info).delete(handlers::delete_video),
        )
        .route("/videos/:id/progress", get(handlers::video_progress))
        .route("/videos/:id/mpd", get(handlers::manifest))
        .route("/videos/:id/segments/:name", get(handlers::segment))
        .route("/tasks/:task_id", get(handlers::task_status))
        .layer(DefaultBodyLimit::disable())
        .with_state(state);

    let app = if api_prefix.is_empty() {
        api
    } else {
        Router::new().nest(api_prefix, api)
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    app.layer(cors).layer(TraceLayer::new_for_http())
}
