//! Local adapters for single-server deployment.

pub mod ffmpeg;
pub mod fs;
pub mod queue;
pub mod repository;

pub use ffmpeg::FfmpegExecutor;
pub use fs::FsArtifactStore;
pub use queue::{LocalTaskQueue, QueueOptions};
pub use repository::MetadataRepository;
