//! Stream Models
//!
//! Encode settings, RTMP destinations and the full parameter set a batch is
//! started with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::StreamError;
use crate::utils::{mask_secret, mask_url};

/// YouTube primary RTMP ingest endpoint
pub const YOUTUBE_INGEST_BASE_URL: &str = "rtmp://a.rtmp.youtube.com/live2";

/// Video codec options for RTMP/FLV output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

/// Audio codec options for RTMP/FLV output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Aac,
    Mp3,
}

/// Output resolution presets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Resolution {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    /// Keep the input's own dimensions
    #[serde(rename = "source")]
    Source,
}

impl VideoCodec {
    /// FFmpeg encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
        }
    }
}

impl AudioCodec {
    /// FFmpeg encoder name
    pub fn encoder(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "libmp3lame",
        }
    }
}

impl Resolution {
    /// Target frame height, `None` for [`Resolution::Source`]
    pub fn height(&self) -> Option<u32> {
        match self {
            Resolution::P480 => Some(480),
            Resolution::P720 => Some(720),
            Resolution::P1080 => Some(1080),
            Resolution::P1440 => Some(1440),
            Resolution::Source => None,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "h264"),
            VideoCodec::H265 => write!(f, "h265"),
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "h264" | "libx264" => Ok(VideoCodec::H264),
            "h265" | "hevc" | "libx265" => Ok(VideoCodec::H265),
            _ => Err(format!("Unknown video codec: {}", s)),
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioCodec::Aac => write!(f, "aac"),
            AudioCodec::Mp3 => write!(f, "mp3"),
        }
    }
}

impl FromStr for AudioCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aac" => Ok(AudioCodec::Aac),
            "mp3" | "libmp3lame" => Ok(AudioCodec::Mp3),
            _ => Err(format!("Unknown audio codec: {}", s)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.height() {
            Some(height) => write!(f, "{}p", height),
            None => write!(f, "source"),
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "480p" => Ok(Resolution::P480),
            "720p" => Ok(Resolution::P720),
            "1080p" => Ok(Resolution::P1080),
            "1440p" => Ok(Resolution::P1440),
            "source" => Ok(Resolution::Source),
            _ => Err(format!("Unknown resolution: {}", s)),
        }
    }
}

/// Encoder settings for one batch. Every field has a default so partially
/// specified settings (config file, CLI flags) fill in the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EncodeSettings {
    pub resolution: Resolution,
    pub video_codec: VideoCodec,
    pub video_bitrate_kbps: u32,
    pub fps: u32,
    pub preset: String,
    pub audio_codec: AudioCodec,
    pub audio_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::P1080,
            video_codec: VideoCodec::H264,
            video_bitrate_kbps: 2500,
            fps: 30,
            preset: "veryfast".to_string(),
            audio_codec: AudioCodec::Aac,
            audio_bitrate_kbps: 128,
            audio_sample_rate: 44100,
        }
    }
}

impl EncodeSettings {
    /// Validate once at batch start; the runner trusts these values afterwards.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(100..=51_000).contains(&self.video_bitrate_kbps) {
            return Err(StreamError::invalid_settings(
                "video_bitrate_kbps",
                format!("{} is outside 100..=51000", self.video_bitrate_kbps),
            ));
        }
        if !(1..=120).contains(&self.fps) {
            return Err(StreamError::invalid_settings(
                "fps",
                format!("{} is outside 1..=120", self.fps),
            ));
        }
        if !(32..=512).contains(&self.audio_bitrate_kbps) {
            return Err(StreamError::invalid_settings(
                "audio_bitrate_kbps",
                format!("{} is outside 32..=512", self.audio_bitrate_kbps),
            ));
        }
        if ![22050, 44100, 48000].contains(&self.audio_sample_rate) {
            return Err(StreamError::invalid_settings(
                "audio_sample_rate",
                format!("{} is not one of 22050, 44100, 48000", self.audio_sample_rate),
            ));
        }
        if self.preset.trim().is_empty() || self.preset.contains(char::is_whitespace) {
            return Err(StreamError::invalid_settings(
                "preset",
                "must be a single non-empty word",
            ));
        }
        Ok(())
    }

    /// Encoder buffer size, twice the video bitrate
    pub fn buffer_size_kbps(&self) -> u32 {
        self.video_bitrate_kbps * 2
    }

    /// Keyframe interval in frames, twice the frame rate (two-second GOP)
    pub fn keyframe_interval(&self) -> u32 {
        self.fps * 2
    }
}

/// RTMP destination for a batch; fixed for the batch's lifetime
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamTarget {
    /// Combined with the ingest base URL
    StreamKey(String),
    /// Used verbatim
    ExplicitUrl(String),
}

impl StreamTarget {
    /// Build a target from the two optional inputs a caller may supply.
    /// Exactly one of them must be present and non-empty.
    pub fn from_parts(
        stream_key: Option<String>,
        explicit_url: Option<String>,
    ) -> Result<Self, StreamError> {
        let stream_key = stream_key.filter(|k| !k.trim().is_empty());
        let explicit_url = explicit_url.filter(|u| !u.trim().is_empty());

        match (stream_key, explicit_url) {
            (Some(key), None) => Ok(StreamTarget::StreamKey(key.trim().to_string())),
            (None, Some(url)) => {
                let url = url.trim().to_string();
                let parsed = url::Url::parse(&url)
                    .map_err(|e| StreamError::InvalidTarget(format!("invalid RTMP URL: {}", e)))?;
                if !matches!(parsed.scheme(), "rtmp" | "rtmps") || parsed.host_str().is_none() {
                    return Err(StreamError::InvalidTarget(
                        "explicit URL must be rtmp:// or rtmps:// with a host".to_string(),
                    ));
                }
                Ok(StreamTarget::ExplicitUrl(url))
            }
            (Some(_), Some(_)) => Err(StreamError::InvalidTarget(
                "supply either a stream key or an RTMP URL, not both".to_string(),
            )),
            (None, None) => Err(StreamError::InvalidTarget(
                "a stream key or an RTMP URL is required".to_string(),
            )),
        }
    }

    /// Resolve the full output URL handed to the transcoder
    pub fn resolve(&self, base_ingest_url: &str) -> String {
        match self {
            StreamTarget::ExplicitUrl(url) => url.clone(),
            StreamTarget::StreamKey(key) => {
                format!("{}/{}", base_ingest_url.trim_end_matches('/'), key)
            }
        }
    }

    /// The secret part of the target, used to scrub log lines
    pub fn secret(&self) -> &str {
        match self {
            StreamTarget::StreamKey(key) => key,
            StreamTarget::ExplicitUrl(url) => url,
        }
    }

    /// Stream key when one was supplied directly
    pub fn stream_key(&self) -> Option<&str> {
        match self {
            StreamTarget::StreamKey(key) => Some(key),
            StreamTarget::ExplicitUrl(_) => None,
        }
    }
}

// Keeps the secret out of `{:?}` output
impl fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTarget::StreamKey(key) => f.debug_tuple("StreamKey").field(&mask_secret(key)).finish(),
            StreamTarget::ExplicitUrl(url) => f.debug_tuple("ExplicitUrl").field(&mask_url(url)).finish(),
        }
    }
}

/// Everything needed to start one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamParams {
    pub video_path: PathBuf,
    pub target: StreamTarget,
    #[serde(default)]
    pub settings: EncodeSettings,
    /// Stop after this many seconds; loop forever when absent
    #[serde(default)]
    pub duration_limit_secs: Option<u64>,
    /// Portrait 720x1280 output for Shorts
    #[serde(default)]
    pub vertical: bool,
    #[serde(default)]
    pub channel_name: Option<String>,
}

impl StreamParams {
    pub fn new(video_path: impl Into<PathBuf>, target: StreamTarget) -> Self {
        Self {
            video_path: video_path.into(),
            target,
            settings: EncodeSettings::default(),
            duration_limit_secs: None,
            vertical: false,
            channel_name: None,
        }
    }

    pub fn duration_limit(&self) -> Option<Duration> {
        self.duration_limit_secs.map(Duration::from_secs)
    }

    /// Validate everything that can be checked without touching the filesystem
    pub fn validate(&self) -> Result<(), StreamError> {
        self.settings.validate()?;
        if self.duration_limit_secs == Some(0) {
            return Err(StreamError::invalid_settings(
                "duration_limit_secs",
                "must be greater than zero when set",
            ));
        }
        if self.video_path.as_os_str().is_empty() {
            return Err(StreamError::invalid_settings("video_path", "must not be empty"));
        }
        Ok(())
    }
}
