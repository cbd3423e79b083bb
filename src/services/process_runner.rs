//! Transcoder process runner
//!
//! Runs one FFmpeg invocation to completion. Standard output and standard
//! error are read concurrently and forwarded as a single line stream; each
//! line is masked and handed to the [`RunLogger`] before the next one is
//! read. Every run is bracketed by a `[START]` line and exactly one `[END]`
//! line, whatever the outcome.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FfmpegConfig;
use crate::errors::StreamError;
use crate::models::{LogType, StreamParams};
use crate::services::ffmpeg_command_builder::FFmpegCommandBuilder;
use crate::utils::LogMasker;

/// Extra time granted past `-t` before the runner kills the process itself
const DURATION_GRACE: Duration = Duration::from_secs(30);

/// Lines kept to explain a non-zero exit
const FAILURE_CONTEXT_LINES: usize = 3;

pub const START_MARKER: &str = "[START]";
pub const END_MARKER: &str = "[END]";

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationResult {
    /// Exited zero, or the duration limit was reached
    Success,
    /// Terminated on request
    Stopped,
    Failure(StreamError),
}

/// Receives the masked lines of one run, in order
#[async_trait]
pub trait RunLogger: Send + Sync {
    async fn log(&self, log_type: LogType, message: String);
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    builder: FFmpegCommandBuilder,
    stop_timeout: Duration,
}

impl ProcessRunner {
    pub fn new(builder: FFmpegCommandBuilder, stop_timeout: Duration) -> Self {
        Self {
            builder,
            stop_timeout,
        }
    }

    pub fn from_config(config: &FfmpegConfig) -> Self {
        Self::new(
            FFmpegCommandBuilder::from_config(config),
            Duration::from_secs(config.stop_timeout_seconds),
        )
    }

    pub fn builder(&self) -> &FFmpegCommandBuilder {
        &self.builder
    }

    /// Masked form of the URL this batch will publish to
    pub fn masked_output_url(&self, params: &StreamParams) -> String {
        let url = self.builder.resolve_output_url(&params.target);
        LogMasker::new(&url, &params.target).masked_url()
    }

    /// Run the transcoder until it exits, fails or `cancel` fires.
    /// No retry happens here.
    pub async fn run(
        &self,
        params: &StreamParams,
        logger: &dyn RunLogger,
        cancel: CancellationToken,
    ) -> TerminationResult {
        let output_url = self.builder.resolve_output_url(&params.target);
        let masker = LogMasker::new(&output_url, &params.target);
        let args = self.builder.build_args(params);

        logger
            .log(
                LogType::Info,
                format!("{} {}", START_MARKER, self.builder.summary(&args, &masker)),
            )
            .await;

        let result = self.execute(params, &args, &masker, logger, &cancel).await;

        let (log_type, message) = match &result {
            TerminationResult::Success => (LogType::Info, "Streaming finished".to_string()),
            TerminationResult::Stopped => (LogType::Info, "Streaming stopped by request".to_string()),
            TerminationResult::Failure(e) => (
                LogType::Error,
                format!("Streaming failed: {}", masker.mask(&e.to_string())),
            ),
        };
        logger.log(log_type, format!("{} {}", END_MARKER, message)).await;

        result
    }

    async fn execute(
        &self,
        params: &StreamParams,
        args: &[String],
        masker: &LogMasker,
        logger: &dyn RunLogger,
        cancel: &CancellationToken,
    ) -> TerminationResult {
        if tokio::fs::metadata(&params.video_path).await.is_err() {
            return TerminationResult::Failure(StreamError::InputMissing(
                params.video_path.display().to_string(),
            ));
        }

        let mut cmd = Command::new(self.builder.command());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn FFmpeg '{}': {}", self.builder.command(), e);
                return TerminationResult::Failure(StreamError::spawn(
                    self.builder.command(),
                    e.to_string(),
                ));
            }
        };
        info!(pid = ?child.id(), "FFmpeg process started");

        let mut stdout = child.stdout.take().map(OutputLines::new);
        let mut stderr = child.stderr.take().map(OutputLines::new);

        let limit_deadline = params
            .duration_limit()
            .map(|limit| Instant::now() + limit + DURATION_GRACE);
        let mut kill_deadline: Option<Instant> = None;
        let mut stop_requested = false;
        let mut limit_reached = false;
        let mut read_error: Option<String> = None;
        let mut recent: VecDeque<String> = VecDeque::with_capacity(FAILURE_CONTEXT_LINES);

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                _ = cancel.cancelled(), if kill_deadline.is_none() => {
                    stop_requested = true;
                    kill_deadline = Some(Instant::now() + self.stop_timeout);
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill FFmpeg process: {}", e);
                    }
                }
                _ = wait_until(limit_deadline), if kill_deadline.is_none() => {
                    warn!("FFmpeg ran past its duration limit, terminating");
                    limit_reached = true;
                    kill_deadline = Some(Instant::now() + self.stop_timeout);
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill FFmpeg process: {}", e);
                    }
                }
                // Descendants may keep the pipes open after the kill
                _ = wait_until(kill_deadline) => {
                    break;
                }
                line = next_line(&mut stdout) => match line {
                    Ok(Some(line)) => self.forward(&line, masker, logger, &mut recent).await,
                    Ok(None) => stdout = None,
                    Err(e) => {
                        read_error = Some(format!("stdout: {}", e));
                        stdout = None;
                    }
                },
                line = next_line(&mut stderr) => match line {
                    Ok(Some(line)) => self.forward(&line, masker, logger, &mut recent).await,
                    Ok(None) => stderr = None,
                    Err(e) => {
                        read_error = Some(format!("stderr: {}", e));
                        stderr = None;
                    }
                },
            }
        }

        let status = self
            .wait_for_exit(&mut child, cancel, &mut stop_requested, kill_deadline)
            .await;

        if stop_requested {
            return TerminationResult::Stopped;
        }
        if limit_reached {
            return TerminationResult::Success;
        }

        match status {
            Some(Ok(status)) if status.success() => {
                if let Some(e) = read_error {
                    warn!("FFmpeg exited cleanly after an output read error: {}", e);
                }
                TerminationResult::Success
            }
            Some(Ok(status)) => {
                let context = recent.into_iter().collect::<Vec<_>>().join(" | ");
                let message = match (read_error, context.is_empty()) {
                    (Some(e), _) => format!("{}; output read error: {}", status, e),
                    (None, true) => status.to_string(),
                    (None, false) => format!("{}: {}", status, context),
                };
                TerminationResult::Failure(StreamError::runtime(status.code(), message))
            }
            Some(Err(e)) => TerminationResult::Failure(StreamError::runtime(None, e.to_string())),
            None => TerminationResult::Failure(StreamError::runtime(
                None,
                "FFmpeg did not exit after being killed",
            )),
        }
    }

    /// Wait for the child after its output closed. A cancel arriving now
    /// still kills the process. `None` means the kill wait timed out.
    async fn wait_for_exit(
        &self,
        child: &mut Child,
        cancel: &CancellationToken,
        stop_requested: &mut bool,
        kill_deadline: Option<Instant>,
    ) -> Option<std::io::Result<ExitStatus>> {
        let deadline = match kill_deadline {
            Some(deadline) => deadline,
            None => {
                tokio::select! {
                    status = child.wait() => return Some(status),
                    _ = cancel.cancelled() => {
                        *stop_requested = true;
                        if let Err(e) = child.start_kill() {
                            warn!("Failed to kill FFmpeg process: {}", e);
                        }
                        Instant::now() + self.stop_timeout
                    }
                }
            }
        };

        match timeout(deadline.saturating_duration_since(Instant::now()), child.wait()).await {
            Ok(status) => Some(status),
            Err(_) => {
                warn!(
                    "FFmpeg did not exit within {:?} of the kill request",
                    self.stop_timeout
                );
                None
            }
        }
    }

    async fn forward(
        &self,
        raw: &str,
        masker: &LogMasker,
        logger: &dyn RunLogger,
        recent: &mut VecDeque<String>,
    ) {
        // Progress updates are separated by carriage returns
        for segment in raw.split('\r').map(str::trim_end).filter(|s| !s.is_empty()) {
            let line = masker.mask(segment);
            if is_error_line(&line) {
                warn!("ffmpeg: {}", line);
            } else {
                debug!("ffmpeg: {}", line);
            }
            if recent.len() >= FAILURE_CONTEXT_LINES {
                recent.pop_front();
            }
            recent.push_back(line.clone());
            logger.log(LogType::Ffmpeg, line).await;
        }
    }
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("error")
        || lower.contains("failed")
        || lower.contains("invalid")
        || lower.contains("could not")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
}

/// Byte-oriented line reader. FFmpeg echoes container metadata verbatim,
/// so output is not guaranteed to be UTF-8; invalid sequences are replaced
/// instead of ending the stream.
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Partial lines stay in `buf` if the read is cancelled by `select!`
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.reader.read_until(b'\n', &mut self.buf).await?;
        if self.buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(&['\n', '\r'][..])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}

/// Next line from an optional reader; pends forever once the reader is gone
async fn next_line<R>(lines: &mut Option<OutputLines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
