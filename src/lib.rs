//! Streambuddy - Upload, DASH transcoding and segment delivery
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (sanitize, validator, jobs, dash, progress)
//! - ports/: Trait definitions (storage, repository, queue, transcoder)
//! - adapters/: Concrete implementations (local filesystem, ffmpeg, task queue, HTTP)
//! - application/: Services (upload, lifecycle, orchestrator, worker, streaming)
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use adapters::http::{router, AppState};
pub use config::AppConfig;
pub use error::{AppError, ProcessingError};
