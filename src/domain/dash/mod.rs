//! MPEG-DASH packaging: the rendition ladder, the ffmpeg invocation that
//! produces it, and the naming of the files it writes.

pub mod manifest;
pub mod segments;

use std::path::Path;

/// Seconds of media per segment.
pub const SEGMENT_DURATION_SECS: u32 = 4;

/// Keyframe interval in frames, shared by all renditions so segments align.
pub const GOP_SIZE: u32 = 48;

pub const INIT_SEGMENT_TEMPLATE: &str = "init-$RepresentationID$.m4s";
pub const MEDIA_SEGMENT_TEMPLATE: &str = "chunk-$RepresentationID$-$Number%05d$.m4s";

/// One resolution/bitrate variant of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendition {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
}

impl Rendition {
    pub fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

pub const LADDER: [Rendition; 3] = [
    Rendition {
        name: "1080p",
        width: 1920,
        height: 1080,
        bitrate_kbps: 5000,
        maxrate_kbps: 5500,
        bufsize_kbps: 10000,
    },
    Rendition {
        name: "720p",
        width: 1280,
        height: 720,
        bitrate_kbps: 2800,
        maxrate_kbps: 3300,
        bufsize_kbps: 6000,
    },
    Rendition {
        name: "480p",
        width: 854,
        height: 480,
        bitrate_kbps: 1400,
        maxrate_kbps: 1750,
        bufsize_kbps: 2800,
    },
];

pub fn rendition_names() -> Vec<String> {
    LADDER.iter().map(|r| r.name.to_string()).collect()
}

/// Manifest file name for a job.
pub fn manifest_name(video_id: &str) -> String {
    format!("{}.mpd", video_id)
}

/// Arguments (without the program name) for an ffmpeg run packaging `input`
/// into a DASH manifest at `manifest_path`, with segments next to it.
pub fn ffmpeg_args(input: &Path, manifest_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];

    for (i, rendition) in LADDER.iter().enumerate() {
        args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            format!("-s:v:{}", i),
            rendition.size(),
            format!("-c:v:{}", i),
            "libx264".to_string(),
            format!("-b:v:{}", i),
            format!("{}k", rendition.bitrate_kbps),
            format!("-maxrate:v:{}", i),
            format!("{}k", rendition.maxrate_kbps),
            format!("-bufsize:v:{}", i),
            format!("{}k", rendition.bufsize_kbps),
        ]);
    }

    let gop = GOP_SIZE.to_string();
    args.extend(
        [
            "-preset", "veryfast",
            "-profile:v", "main",
            "-keyint_min", gop.as_str(),
            "-g", gop.as_str(),
            "-sc_threshold", "0",
            "-b_strategy", "0",
            "-f", "dash",
            "-init_seg_name", INIT_SEGMENT_TEMPLATE,
            "-media_seg_name", MEDIA_SEGMENT_TEMPLATE,
            "-adaptation_sets", "id=0,streams=v",
            "-use_template", "1",
            "-use_timeline", "1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push("-seg_duration".into());
    args.push(SEGMENT_DURATION_SECS.to_string());
    args.push(manifest_path.to_string_lossy().into_owned());
    args
}
