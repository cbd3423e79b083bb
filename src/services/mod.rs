//! Service layer
//!
//! The streaming core (runner, supervisor, log path and session registry)
//! plus the YouTube API client used to obtain publish targets.

pub mod ffmpeg_command_builder;
pub mod job_supervisor;
pub mod log_aggregator;
pub mod log_tail;
pub mod process_runner;
pub mod session_registry;
pub mod youtube_client;

pub use ffmpeg_command_builder::FFmpegCommandBuilder;
pub use job_supervisor::JobSupervisor;
pub use log_aggregator::{LogAggregator, LogAggregatorHandle};
pub use log_tail::{LogTail, DEFAULT_LOG_TAIL_CAPACITY};
pub use process_runner::{ProcessRunner, RunLogger, TerminationResult, END_MARKER, START_MARKER};
pub use session_registry::SessionRegistry;
pub use youtube_client::{
    BroadcastRequest, ChannelInfo, LiveStreamInfo, OAuthTokens, Privacy, YouTubeClient,
};
