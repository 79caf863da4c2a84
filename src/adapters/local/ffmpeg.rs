use crate::config::AppConfig;
use crate::domain::progress::{parse_duration, parse_time};
use crate::ports::transcoder::{ProcessOutput, ProgressSender, TranscodeExecutor};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tracing::debug;

/// Runs the ffmpeg/ffprobe binaries as child processes.
#[derive(Clone, Debug)]
pub struct FfmpegExecutor {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    niceness: i32,
}

impl FfmpegExecutor {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            niceness: 0,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.ffmpeg_bin, &config.ffprobe_bin).with_niceness(config.transcode_niceness)
    }

    /// Start transcodes through `nice -n <niceness>` so they yield to the
    /// request path. Zero disables it.
    pub fn with_niceness(mut self, niceness: i32) -> Self {
        self.niceness = niceness;
        self
    }

    fn command(&self) -> TokioCommand {
        if self.niceness > 0 {
            let mut command = TokioCommand::new("nice");
            command
                .arg("-n")
                .arg(self.niceness.to_string())
                .arg(&self.ffmpeg_bin);
            command
        } else {
            TokioCommand::new(&self.ffmpeg_bin)
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<String> {
    let mut out = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut out).await?;
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Collect stderr while forwarding the position of every `time=` status
/// line. ffmpeg terminates those with `\r`, not `\n`.
async fn read_progress<R: AsyncRead + Unpin>(
    reader: Option<R>,
    progress: Option<ProgressSender>,
) -> io::Result<String> {
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };

    let mut all = Vec::new();
    let mut line = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        all.extend_from_slice(&buf[..n]);
        for &byte in &buf[..n] {
            if byte == b'\r' || byte == b'\n' {
                report(&line, progress.as_ref());
                line.clear();
            } else {
                line.push(byte);
            }
        }
    }
    report(&line, progress.as_ref());
    Ok(String::from_utf8_lossy(&all).into_owned())
}

fn report(line: &[u8], progress: Option<&ProgressSender>) {
    let Some(progress) = progress else { return };
    if let Some(position) = parse_time(&String::from_utf8_lossy(line)) {
        // Nobody listening any more is fine.
        let _ = progress.send(position);
    }
}

#[async_trait]
impl TranscodeExecutor for FfmpegExecutor {
    async fn transcode(
        &self,
        args: Vec<String>,
        progress: Option<ProgressSender>,
    ) -> io::Result<ProcessOutput> {
        let mut command = self.command();
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} {}", self.ffmpeg_bin, args.join(" "));
        let mut child = command.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, stdout, stderr) = tokio::join!(
            child.wait(),
            read_all(stdout),
            read_progress(stderr, progress)
        );

        Ok(ProcessOutput {
            exit_code: status?.code(),
            stdout: stdout?,
            stderr: stderr?,
        })
    }

    async fn probe_duration(&self, media_path: PathBuf) -> io::Result<Option<f64>> {
        let output = TokioCommand::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(&media_path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_duration(&String::from_utf8_lossy(&output.stdout)))
    }
}
