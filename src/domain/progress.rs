//! Best-effort progress derived from the transcoder's status lines.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;

fn time_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid regex"))
}

/// Media position, in seconds, reported by an ffmpeg status line such as
/// `frame=  240 fps= 60 ... time=00:00:04.00 bitrate=...`.
pub fn parse_time(line: &str) -> Option<f64> {
    let caps = time_field().captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse ffprobe's `format=duration` output.
pub fn parse_duration(output: &str) -> Option<f64> {
    output
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEstimate {
    pub percent: f32,
    pub remaining_secs: Option<u64>,
}

/// Estimate completion from the encoded position against the source
/// duration, extrapolating the remaining wall time from `elapsed`.
pub fn estimate(position_secs: f64, total_secs: f64, elapsed: Duration) -> Option<ProgressEstimate> {
    if total_secs <= 0.0 || position_secs < 0.0 {
        return None;
    }
    let fraction = (position_secs / total_secs).min(1.0);
    let remaining_secs = if fraction > 0.0 {
        let elapsed = elapsed.as_secs_f64();
        Some((elapsed / fraction - elapsed).max(0.0).round() as u64)
    } else {
        None
    };
    Some(ProgressEstimate {
        percent: (fraction * 100.0) as f32,
        remaining_secs,
    })
}
