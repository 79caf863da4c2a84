use super::{AppState, OWNER_HEADER};
use crate::application::streaming::{ArtifactBody, ServedArtifact};
use crate::application::upload::UploadReceipt;
use crate::application::videos::{ProgressReport, VideoInfo};
use crate::domain::validator::ValidationError;
use crate::error::AppError;
use crate::ports::queue::TaskOutcome;
use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use futures::TryStreamExt;
use std::io;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};

fn owner_id(headers: &HeaderMap, default_owner: &str) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_owner)
        .to_string()
}

/// Spool a multipart file field to a temp file, refusing to write more than
/// `max` bytes. Returns the file and its size.
async fn stream_to_staging(
    field: Field<'_>,
    state: &AppState,
) -> Result<(NamedTempFile, u64), AppError> {
    let max = state.max_upload_bytes;
    let unexpected = |e: io::Error| AppError::Unexpected(format!("staging upload: {}", e));

    let staging = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(&state.staging_dir)
        .map_err(unexpected)?;
    let file = tokio::fs::File::from_std(staging.reopen().map_err(unexpected)?);

    let body_with_io_error = field.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut limited = body_reader.take(max.saturating_add(1));

    let mut writer = BufWriter::new(file);
    let size = tokio::io::copy(&mut limited, &mut writer)
        .await
        .map_err(|e| AppError::invalid("file", format!("Upload was interrupted: {}", e)))?;
    writer.flush().await.map_err(unexpected)?;

    if size > max {
        return Err(AppError::InvalidVideo(ValidationError::Oversized { size, max }));
    }
    Ok((staging, size))
}

pub async fn upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadReceipt>), AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    let mut title: Option<String> = None;
    let mut staged: Option<(String, NamedTempFile, u64)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::invalid("file", e.body_text()))?
    {
        match field.name() {
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::invalid("title", e.body_text()))?;
                title = Some(text);
            }
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let (staging, size) = stream_to_staging(field, &state).await?;
                staged = Some((file_name, staging, size));
            }
            _ => continue,
        }
    }

    let title = title.ok_or_else(|| AppError::invalid("title", "This field is required."))?;
    let (file_name, staging, size) =
        staged.ok_or_else(|| AppError::invalid("file", "No file was submitted."))?;

    // Accepted uploads are moved out of staging; anything left is removed
    // when `staging` drops.
    let staging = staging.into_temp_path();
    let receipt = state
        .uploads
        .upload_staged(&owner, &title, &file_name, &staging, size)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn list_videos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<VideoInfo>>, AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    Ok(Json(state.videos.list(&owner).await?))
}

pub async fn video_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<VideoInfo>, AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    Ok(Json(state.videos.info(&owner, &id).await?))
}

pub async fn video_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ProgressReport>, AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    Ok(Json(state.videos.progress(&owner, &id).await?))
}

pub async fn delete_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    state.videos.delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskOutcome>, AppError> {
    Ok(Json(state.videos.task_status(&task_id).await?))
}

pub async fn manifest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    let artifact = state.segments.manifest(&owner, &id).await?;
    artifact_response(artifact)
}

pub async fn segment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let owner = owner_id(&headers, &state.default_owner);
    let artifact = state.segments.segment(&owner, &id, &name).await?;
    artifact_response(artifact)
}

fn artifact_response(artifact: ServedArtifact) -> Result<Response, AppError> {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.kind.content_type())
        .header(header::CACHE_CONTROL, artifact.kind.cache_control())
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type");

    let response = match artifact.body {
        ArtifactBody::File { file, len } => builder
            .header(header::CONTENT_LENGTH, len)
            .body(Body::from_stream(ReaderStream::new(file))),
        ArtifactBody::Redirect(location) => builder
            .header("x-accel-redirect", location)
            .body(Body::empty()),
    };
    response.map_err(|e| AppError::Unexpected(format!("building response: {}", e)))
}
