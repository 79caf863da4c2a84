use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

/// Media position in seconds, as reported while the transcoder runs.
pub type ProgressSender = UnboundedSender<f64>;

/// What a finished transcoder process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodeExecutor: Send + Sync {
    /// Run the transcoder with `args` to completion. Dropping the future
    /// must kill the process.
    async fn transcode(
        &self,
        args: Vec<String>,
        progress: Option<ProgressSender>,
    ) -> io::Result<ProcessOutput>;

    /// Source duration in seconds, if it can be determined.
    async fn probe_duration(&self, media_path: PathBuf) -> io::Result<Option<f64>>;
}
