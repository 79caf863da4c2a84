use crate::domain::dash::manifest_name;
use crate::domain::dash::segments::is_flat_artifact_of;
use crate::domain::jobs::VideoJob;
use crate::domain::sanitize::is_identifier;
use crate::ports::storage::{ArtifactStore, StorageError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TEMP_UPLOADS_DIR: &str = "temp_uploads";
const DASH_OUTPUT_DIR: &str = "dash_output";
const METADATA_DIR: &str = "metadata";

/// Artifact store rooted at a media directory:
///
/// ```text
/// <root>/temp_uploads/<id>_<filename>
/// <root>/metadata/<id>.json
/// <root>/dash_output/<id>/<id>.mpd, init-*.m4s, chunk-*.m4s
/// ```
///
/// Older deployments wrote DASH output flat into `dash_output/` as
/// `<id>.mpd` and `<id>_<segment>`; reads and deletes understand that layout
/// too, with the same exact ownership rule.
///
/// Metadata writes and deletes are serialized. A write runs to completion on
/// its own task even if the caller is dropped, so once a delete holds the
/// lock no earlier write can bring the record back.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    metadata_lock: Arc<Mutex<()>>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dash_root(&self) -> PathBuf {
        self.root.join(DASH_OUTPUT_DIR)
    }

    pub fn output_dir(&self, video_id: &str) -> PathBuf {
        self.dash_root().join(video_id)
    }

    fn metadata_path(&self, video_id: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{}.json", video_id))
    }

    fn temp_upload_path(&self, video_id: &str, original_filename: &str) -> PathBuf {
        self.root
            .join(TEMP_UPLOADS_DIR)
            .join(format!("{}_{}", video_id, safe_filename(original_filename)))
    }

    /// Resolve `name` inside the subdirectory layout, then the flat one. The
    /// flat directory is shared, so only names owned by `video_id` are
    /// looked up there.
    async fn resolve_artifact(&self, video_id: &str, name: &str) -> Result<PathBuf, StorageError> {
        if !is_identifier(video_id) || !is_single_component(name) {
            return Err(StorageError::NotFound(format!("{}/{}", video_id, name)));
        }
        let mut candidates = vec![self.output_dir(video_id).join(name)];
        if is_flat_artifact_of(video_id, name) {
            candidates.push(self.dash_root().join(name));
        }
        for candidate in candidates {
            if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
                return Ok(candidate);
            }
        }
        Err(StorageError::NotFound(format!("{}/{}", video_id, name)))
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Last path component of a client-supplied file name, restricted to
/// filesystem-safe characters.
fn safe_filename(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

async fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save_temp_upload(
        &self,
        video_id: &str,
        original_filename: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<PathBuf, StorageError> {
        if !is_identifier(video_id) {
            return Err(StorageError::NotFound(video_id.to_string()));
        }
        fs::create_dir_all(self.root.join(TEMP_UPLOADS_DIR)).await?;
        let path = self.temp_upload_path(video_id, original_filename);

        let file = fs::File::create(&path).await?;
        let mut writer = BufWriter::new(file);
        let written = match tokio::io::copy(reader, &mut writer).await {
            Ok(n) => n,
            Err(e) => {
                drop(writer);
                let _ = remove_file_if_exists(&path).await;
                return Err(e.into());
            }
        };
        writer.flush().await?;
        debug!("Saved temp upload {} ({} bytes)", path.display(), written);
        Ok(path)
    }

    async fn adopt_temp_upload(
        &self,
        video_id: &str,
        original_filename: &str,
        staged: &Path,
    ) -> Result<PathBuf, StorageError> {
        if !is_identifier(video_id) {
            return Err(StorageError::NotFound(video_id.to_string()));
        }
        fs::create_dir_all(self.root.join(TEMP_UPLOADS_DIR)).await?;
        let path = self.temp_upload_path(video_id, original_filename);

        if let Err(e) = fs::rename(staged, &path).await {
            // Staging on another filesystem: fall back to a copy.
            debug!("Copying {} instead of renaming: {}", staged.display(), e);
            if let Err(e) = fs::copy(staged, &path).await {
                let _ = remove_file_if_exists(&path).await;
                return Err(e.into());
            }
            let _ = remove_file_if_exists(staged).await;
        }
        debug!("Adopted temp upload {}", path.display());
        Ok(path)
    }

    async fn cleanup_temp_file(&self, path: &Path) -> Result<(), StorageError> {
        if remove_file_if_exists(path).await? {
            debug!("Removed temp upload {}", path.display());
        }
        Ok(())
    }

    async fn create_metadata(&self, job: &VideoJob) -> Result<(), StorageError> {
        if !is_identifier(&job.id) {
            return Err(StorageError::NotFound(job.id.clone()));
        }
        let path = self.metadata_path(&job.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(job)?;

        let _guard = self.metadata_lock.lock().await;
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(job.id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            let _ = remove_file_if_exists(&path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn save_metadata(&self, job: &VideoJob) -> Result<(), StorageError> {
        if !is_identifier(&job.id) {
            return Err(StorageError::NotFound(job.id.clone()));
        }
        let path = self.metadata_path(&job.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(job)?;

        let guard = self.metadata_lock.clone().lock_owned().await;
        let write = tokio::spawn(async move {
            let _guard = guard;
            let staging = path.with_extension("json.tmp");
            fs::write(&staging, body).await?;
            if let Err(e) = fs::rename(&staging, &path).await {
                let _ = remove_file_if_exists(&staging).await;
                return Err(e);
            }
            Ok::<(), std::io::Error>(())
        });
        match write.await {
            Ok(result) => result.map_err(StorageError::from),
            Err(e) => Err(std::io::Error::other(e).into()),
        }
    }

    async fn get_metadata(&self, video_id: &str) -> Result<Option<VideoJob>, StorageError> {
        if !is_identifier(video_id) {
            return Ok(None);
        }
        let raw = match fs::read(self.metadata_path(video_id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupted {
                id: video_id.to_string(),
                source,
            })
    }

    async fn delete_metadata(&self, video_id: &str) -> Result<(), StorageError> {
        if is_identifier(video_id) {
            let _guard = self.metadata_lock.lock().await;
            remove_file_if_exists(&self.metadata_path(video_id)).await?;
        }
        Ok(())
    }

    async fn list_videos(&self) -> Result<Vec<VideoJob>, StorageError> {
        let mut entries = match fs::read_dir(self.root.join(METADATA_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(video_id) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(".json"))
            else {
                continue;
            };
            match self.get_metadata(video_id).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable metadata {}: {}", video_id, e),
            }
        }
        jobs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(jobs)
    }

    async fn prepare_output_dir(&self, video_id: &str) -> Result<PathBuf, StorageError> {
        if !is_identifier(video_id) {
            return Err(StorageError::NotFound(video_id.to_string()));
        }
        let dir = self.output_dir(video_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn manifest_path(&self, video_id: &str) -> Result<PathBuf, StorageError> {
        self.resolve_artifact(video_id, &manifest_name(video_id)).await
    }

    async fn segment_path(&self, video_id: &str, name: &str) -> Result<PathBuf, StorageError> {
        self.resolve_artifact(video_id, name).await
    }

    async fn delete_video(&self, video_id: &str) -> Result<(), StorageError> {
        if !is_identifier(video_id) {
            return Ok(());
        }

        let dir = self.output_dir(video_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Removed {}", dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", dir.display(), e),
        }

        if let Ok(mut entries) = fs::read_dir(self.dash_root()).await {
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Could not list {}: {}", self.dash_root().display(), e);
                        break;
                    }
                };
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !is_flat_artifact_of(video_id, name) {
                    continue;
                }
                let path = entry.path();
                if !fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                    continue;
                }
                if let Err(e) = remove_file_if_exists(&path).await {
                    warn!("Could not remove {}: {}", path.display(), e);
                }
            }
        }

        if let Err(e) = self.delete_metadata(video_id).await {
            warn!("Could not remove metadata for {}: {}", video_id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::JobStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_metadata_round_trip_and_absent() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        assert!(store.get_metadata("missing").await.unwrap().is_none());

        let mut job = VideoJob::new("my_clip", "alice", "My Clip", "clip.mp4");
        store.create_metadata(&job).await.unwrap();
        job.mark_queued("task-1").unwrap();
        store.save_metadata(&job).await.unwrap();

        let loaded = store.get_metadata("my_clip").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.task_id.as_deref(), Some("task-1"));
        assert!(!dir.path().join("metadata/my_clip.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_create_metadata_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let job = VideoJob::new("my_clip", "alice", "My Clip", "clip.mp4");

        store.create_metadata(&job).await.unwrap();
        let second = VideoJob::new("my_clip", "bob", "my clip", "other.mp4");
        assert!(matches!(
            store.create_metadata(&second).await,
            Err(StorageError::AlreadyExists(id)) if id == "my_clip"
        ));
        let kept = store.get_metadata("my_clip").await.unwrap().unwrap();
        assert_eq!(kept.owner_id, "alice");
    }

    #[tokio::test]
    async fn test_corrupted_metadata_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        fs::create_dir_all(dir.path().join("metadata")).await.unwrap();
        fs::write(dir.path().join("metadata/broken.json"), b"{not json")
            .await
            .unwrap();

        assert!(matches!(
            store.get_metadata("broken").await,
            Err(StorageError::Corrupted { id, .. }) if id == "broken"
        ));
        // Listing skips it rather than failing.
        assert!(store.list_videos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_videos_empty_store() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.list_videos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_temp_upload_and_cleanup() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let mut body: &[u8] = b"payload";

        let path = store
            .save_temp_upload("my_clip", "../../evil name.mp4", &mut body)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("temp_uploads/my_clip_evilname.mp4"));
        assert_eq!(fs::read(&path).await.unwrap(), b"payload");

        store.cleanup_temp_file(&path).await.unwrap();
        assert!(!path.exists());
        // Second cleanup is a no-op.
        store.cleanup_temp_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_adopt_temp_upload_moves_the_file() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let staged = dir.path().join("upload-abc");
        fs::write(&staged, b"payload").await.unwrap();

        let path = store
            .adopt_temp_upload("my_clip", "clip.mp4", &staged)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("temp_uploads/my_clip_clip.mp4"));
        assert_eq!(fs::read(&path).await.unwrap(), b"payload");
        assert!(!staged.exists());

        assert!(store
            .adopt_temp_upload("my_clip", "clip.mp4", &dir.path().join("gone"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_dropped_save_still_lands_before_delete() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let mut job = VideoJob::new("my_clip", "alice", "My Clip", "clip.mp4");
        store.create_metadata(&job).await.unwrap();
        job.mark_queued("t1").unwrap();

        // Start a save and drop it once it has spawned its write.
        let mut save = Box::pin(store.save_metadata(&job));
        let _ = futures::poll!(&mut save);
        drop(save);

        store.delete_metadata("my_clip").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.get_metadata("my_clip").await.unwrap().is_none());
        assert!(!dir.path().join("metadata/my_clip.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_segment_resolution_prefers_subdirectory() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let out = store.prepare_output_dir("my_clip").await.unwrap();
        fs::write(out.join("init-0.m4s"), b"sub").await.unwrap();
        fs::write(dir.path().join("dash_output/init-0.m4s"), b"flat")
            .await
            .unwrap();
        fs::write(dir.path().join("dash_output/chunk-0-00001.m4s"), b"flat")
            .await
            .unwrap();

        assert_eq!(
            store.segment_path("my_clip", "init-0.m4s").await.unwrap(),
            out.join("init-0.m4s")
        );
        assert!(matches!(
            store.segment_path("my_clip", "chunk-0-00002.m4s").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.segment_path("my_clip", "../metadata/my_clip.json").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_flat_lookup_only_serves_owned_names() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.prepare_output_dir("alpha").await.unwrap();
        fs::write(store.dash_root().join("chunk-0-00042.m4s"), b"someone else")
            .await
            .unwrap();
        fs::write(store.dash_root().join("beta_chunk-0-00001.m4s"), b"beta")
            .await
            .unwrap();
        fs::write(store.dash_root().join("alpha_chunk-0-00001.m4s"), b"alpha")
            .await
            .unwrap();

        assert!(matches!(
            store.segment_path("alpha", "chunk-0-00042.m4s").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.segment_path("alpha", "beta_chunk-0-00001.m4s").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(
            store.segment_path("alpha", "alpha_chunk-0-00001.m4s").await.unwrap(),
            store.dash_root().join("alpha_chunk-0-00001.m4s")
        );
    }

    #[tokio::test]
    async fn test_manifest_path_flat_layout() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.manifest_path("old").await.is_err());

        fs::create_dir_all(store.dash_root()).await.unwrap();
        fs::write(store.dash_root().join("old.mpd"), b"<MPD/>")
            .await
            .unwrap();
        assert_eq!(
            store.manifest_path("old").await.unwrap(),
            store.dash_root().join("old.mpd")
        );
    }

    #[tokio::test]
    async fn test_delete_video_removes_both_layouts() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let job = VideoJob::new("my_clip", "alice", "My Clip", "clip.mp4");
        store.create_metadata(&job).await.unwrap();

        let out = store.prepare_output_dir("my_clip").await.unwrap();
        fs::write(out.join("my_clip.mpd"), b"<MPD/>").await.unwrap();
        fs::write(out.join("chunk-0-00001.m4s"), b"x").await.unwrap();
        fs::write(store.dash_root().join("my_clip.mpd"), b"<MPD/>")
            .await
            .unwrap();
        fs::write(store.dash_root().join("my_clip_segment_1.m4s"), b"x")
            .await
            .unwrap();
        fs::write(store.dash_root().join("other.mpd"), b"<MPD/>")
            .await
            .unwrap();

        store.delete_video("my_clip").await.unwrap();

        assert!(!out.exists());
        assert!(!store.dash_root().join("my_clip.mpd").exists());
        assert!(!store.dash_root().join("my_clip_segment_1.m4s").exists());
        assert!(store.dash_root().join("other.mpd").exists());
        assert!(store.get_metadata("my_clip").await.unwrap().is_none());

        // Deleting again is harmless.
        store.delete_video("my_clip").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_video_spares_identifiers_sharing_a_prefix() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        fs::create_dir_all(store.dash_root()).await.unwrap();
        for name in [
            "my.mpd",
            "my_segment_1.m4s",
            "my_clip.mpd",
            "my_clip_segment_1.m4s",
            "my_clip_init-0.m4s",
            "my-clip.mpd",
            "my-clip_chunk-0-00001.m4s",
        ] {
            fs::write(store.dash_root().join(name), b"x").await.unwrap();
        }

        store.delete_video("my").await.unwrap();

        assert!(!store.dash_root().join("my.mpd").exists());
        assert!(!store.dash_root().join("my_segment_1.m4s").exists());
        for kept in [
            "my_clip.mpd",
            "my_clip_segment_1.m4s",
            "my_clip_init-0.m4s",
            "my-clip.mpd",
            "my-clip_chunk-0-00001.m4s",
        ] {
            assert!(store.dash_root().join(kept).exists(), "{} was removed", kept);
        }
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("clip.mp4"), "clip.mp4");
        assert_eq!(safe_filename("C:\\videos\\My Clip.mov"), "MyClip.mov");
        assert_eq!(safe_filename("../.."), "upload");
        assert_eq!(safe_filename(""), "upload");
    }
}
