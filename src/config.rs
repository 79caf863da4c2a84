//! Configuration loaded from the environment.

use crate::domain::validator::DEFAULT_MAX_UPLOAD_BYTES;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Root of temp uploads, DASH output and metadata
    pub media_root: PathBuf,
    /// Path prefix of every route, also used in manifest BaseURLs
    pub api_prefix: String,
    pub max_upload_bytes: u64,
    /// Concurrent transcodes
    pub worker_count: usize,
    /// Wall-clock limit per transcode task; `None` disables it
    pub task_timeout: Option<Duration>,
    /// How long finished task outcomes stay queryable
    pub task_result_ttl: Duration,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// `nice` increment for transcoder processes; 0 runs them unmodified
    pub transcode_niceness: i32,
    /// Internal location a fronting nginx serves `media_root/dash_output`
    /// from. When set, segments are handed off with `X-Accel-Redirect`.
    pub accel_redirect_prefix: Option<String>,
    /// Owner assumed when a request carries no owner header
    pub default_owner: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: String::from("127.0.0.1"),
            port: String::from("8000"),
            media_root: PathBuf::from("./media"),
            api_prefix: String::from("/api"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            worker_count: 2,
            task_timeout: Some(Duration::from_secs(4 * 60 * 60)),
            task_result_ttl: Duration::from_secs(24 * 60 * 60),
            ffmpeg_bin: String::from("ffmpeg"),
            ffprobe_bin: String::from("ffprobe"),
            transcode_niceness: 10,
            accel_redirect_prefix: None,
            default_owner: String::from("anonymous"),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, after reading `.env`
    /// if present. Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let task_timeout = match parsed::<u64>("TASK_TIMEOUT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.task_timeout,
        };

        Self {
            addr: env::var("ADDR").unwrap_or(defaults.addr),
            port: env::var("PORT").unwrap_or(defaults.port),
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            api_prefix: env::var("API_PREFIX")
                .map(|p| normalize_prefix(&p))
                .unwrap_or(defaults.api_prefix),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            worker_count: parsed::<usize>("WORKER_COUNT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_count),
            task_timeout,
            task_result_ttl: parsed::<u64>("TASK_RESULT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_result_ttl),
            ffmpeg_bin: env::var("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: env::var("FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin),
            transcode_niceness: parsed("TRANSCODE_NICENESS")
                .unwrap_or(defaults.transcode_niceness),
            accel_redirect_prefix: env::var("ACCEL_REDIRECT_PREFIX")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            default_owner: env::var("DEFAULT_OWNER").unwrap_or(defaults.default_owner),
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

/// `/api/` and `api` both become `/api`; an empty prefix stays empty.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
