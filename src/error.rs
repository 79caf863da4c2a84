//! Error types shared across layers, and their HTTP mapping.

use crate::domain::dash::manifest::ManifestError;
use crate::domain::jobs::TransitionError;
use crate::domain::validator::ValidationError;
use crate::ports::queue::QueueError;
use crate::ports::storage::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

/// Longest stderr excerpt kept in a job's error detail.
const STDERR_TAIL_LEN: usize = 2000;

/// Why a transcode did not produce a servable manifest.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("video {0} not found")]
    JobNotFound(String),
    #[error("source file {} is missing", .0.display())]
    SourceMissing(PathBuf),
    #[error("could not start transcoder: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("transcode failed ({}): {}", exit_label(.exit_code), stderr_tail(.stderr))]
    TranscodeFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("transcoder exited cleanly but wrote no manifest at {}", .0.display())]
    MissingManifest(PathBuf),
    #[error("manifest rewrite failed: {0}")]
    Manifest(#[from] ManifestError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Last `STDERR_TAIL_LEN` bytes of the transcoder's diagnostics, where the
/// actual error usually is.
pub fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_LEN {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_LEN;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

/// Errors surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    InvalidVideo(ValidationError),
    #[error("A video with identifier '{0}' already exists")]
    Duplicate(String),
    #[error("Not found")]
    NotFound,
    #[error("processing error: {0}")]
    Processing(#[from] ProcessingError),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AppError::InvalidInput {
            field,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput { .. } | AppError::InvalidVideo(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Processing(_)
            | AppError::Storage(_)
            | AppError::Queue(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists(id) => AppError::Duplicate(id),
            StorageError::NotFound(_) => AppError::NotFound,
            other => AppError::Storage(other),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Io(e) => AppError::Unexpected(format!("reading upload: {}", e)),
            other => AppError::InvalidVideo(other),
        }
    }
}

fn log_error(err: &AppError) {
    match err {
        AppError::InvalidInput { field, message } => warn!("Invalid input ({}): {}", field, message),
        AppError::InvalidVideo(e) => warn!("Rejected upload: {}", e),
        AppError::Duplicate(id) => warn!("Duplicate identifier: {}", id),
        AppError::NotFound => {}
        AppError::Processing(e) => error!("Processing failed: {:?}", e),
        AppError::Storage(e) => error!("Storage failure: {:?}", e),
        AppError::Queue(e) => error!("Task queue failure: {:?}", e),
        AppError::Unexpected(e) => error!("Unexpected error: {}", e),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        log_error(&self);

        let status = self.status();
        let body = match &self {
            AppError::InvalidInput { field, message } => {
                let mut errors = serde_json::Map::new();
                errors.insert(field.to_string(), json!([message]));
                serde_json::Value::Object(errors)
            }
            AppError::InvalidVideo(e) => json!({ "file": [e.to_string()] }),
            AppError::Duplicate(_) => json!({ "error": self.to_string() }),
            AppError::NotFound => json!({ "error": "Not found" }),
            AppError::Processing(_) => json!({ "error": "Video processing failed" }),
            AppError::Storage(_) | AppError::Queue(_) | AppError::Unexpected(_) => {
                json!({ "error": "An internal server error occurred." })
            }
        };

        (status, Json(body)).into_response()
    }
}
