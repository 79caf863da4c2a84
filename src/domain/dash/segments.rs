//! Which file names may be served for a video, and as what.
//!
//! Jobs packaged into their own `dash_output/<id>/` directory use the bare
//! packager names (`init-0.m4s`, `chunk-0-00001.m4s`). Older deployments
//! wrote every job flat into `dash_output/`, prefixing segments with the
//! owning identifier (`<id>_init-0.m4s`, `<id>_segment_3.m4s`).

use super::manifest_name;
use regex::Regex;
use std::sync::OnceLock;

pub const MANIFEST_CONTENT_TYPE: &str = "application/dash+xml";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp4";

const SEGMENT_EXTENSIONS: [&str; 2] = [".m4s", ".mp4"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Manifest,
    InitSegment,
    MediaSegment,
}

impl ArtifactKind {
    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactKind::Manifest => MANIFEST_CONTENT_TYPE,
            ArtifactKind::InitSegment | ArtifactKind::MediaSegment => SEGMENT_CONTENT_TYPE,
        }
    }

    /// Segments never change once written; the manifest is only stable
    /// after packaging finished, so it is revalidated.
    pub fn cache_control(self) -> &'static str {
        match self {
            ArtifactKind::Manifest => "no-cache",
            ArtifactKind::InitSegment | ArtifactKind::MediaSegment => {
                "public, max-age=31536000, immutable"
            }
        }
    }
}

fn flat_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([a-z0-9_-]+)_((?:init-[A-Za-z0-9]+|chunk-[A-Za-z0-9]+-\d+|segment_\d+)\.(?:m4s|mp4))$",
        )
        .expect("valid regex")
    })
}

/// Split a flat-layout segment name into its owning identifier and the
/// per-rendition segment name.
pub fn split_flat_segment(name: &str) -> Option<(&str, &str)> {
    let caps = flat_segment().captures(name)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Whether `name` in the flat `dash_output/` directory belongs to `video_id`.
/// Ownership is exact: the manifest is `<id>.mpd` and segments carry exactly
/// `<id>` before the segment name, so `my` never claims `my_clip`'s files.
pub fn is_flat_artifact_of(video_id: &str, name: &str) -> bool {
    name == manifest_name(video_id)
        || split_flat_segment(name).is_some_and(|(owner, _)| owner == video_id)
}

/// Classify `name` as an artifact of `video_id`, or `None` when it must not
/// be served. Names are single path components made of `[A-Za-z0-9._-]`,
/// so nothing here can step outside the video's directory.
pub fn classify(video_id: &str, name: &str) -> Option<ArtifactKind> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains("..")
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        return None;
    }

    if name == manifest_name(video_id) {
        return Some(ArtifactKind::Manifest);
    }

    if let Some((owner, segment)) = split_flat_segment(name) {
        if owner != video_id {
            return None;
        }
        return Some(if segment.starts_with("init-") {
            ArtifactKind::InitSegment
        } else {
            ArtifactKind::MediaSegment
        });
    }

    if !SEGMENT_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        return None;
    }
    if name.starts_with("init-") {
        Some(ArtifactKind::InitSegment)
    } else if name.starts_with("chunk-") {
        Some(ArtifactKind::MediaSegment)
    } else {
        None
    }
}
