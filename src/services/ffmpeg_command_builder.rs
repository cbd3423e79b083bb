//! FFmpeg Command Builder Service
//!
//! Turns [`StreamParams`] into the transcoder argument list. The output is
//! deterministic for a given set of parameters: input options, video filter,
//! video encoder, audio encoder, then the FLV output URL last.

use tracing::{debug, warn};

use crate::config::FfmpegConfig;
use crate::models::{EncodeSettings, StreamParams, StreamTarget};
use crate::utils::LogMasker;

/// Portrait output for Shorts
pub const VERTICAL_SCALE_FILTER: &str = "scale=720:1280";

#[derive(Debug, Clone)]
pub struct FFmpegCommandBuilder {
    ffmpeg_command: String,
    ingest_base_url: String,
}

impl FFmpegCommandBuilder {
    pub fn new(ffmpeg_command: impl Into<String>, ingest_base_url: impl Into<String>) -> Self {
        Self {
            ffmpeg_command: ffmpeg_command.into(),
            ingest_base_url: ingest_base_url.into(),
        }
    }

    pub fn from_config(config: &FfmpegConfig) -> Self {
        Self::new(&config.command, &config.ingest_base_url)
    }

    pub fn command(&self) -> &str {
        &self.ffmpeg_command
    }

    /// Explicit URL verbatim, otherwise `{ingest_base_url}/{stream_key}`
    pub fn resolve_output_url(&self, target: &StreamTarget) -> String {
        target.resolve(&self.ingest_base_url)
    }

    /// Build FFmpeg command arguments for one batch
    pub fn build_args(&self, params: &StreamParams) -> Vec<String> {
        let mut args = Vec::new();

        self.add_input_args(&mut args, params);
        self.add_video_filter_args(&mut args, &params.settings, params.vertical);
        self.add_video_codec_args(&mut args, &params.settings);
        self.add_audio_codec_args(&mut args, &params.settings);
        self.add_output_args(&mut args, &self.resolve_output_url(&params.target));

        debug!("Generated FFmpeg command with {} arguments", args.len());
        args
    }

    /// Human-readable command line with the output URL masked
    pub fn summary(&self, args: &[String], masker: &LogMasker) -> String {
        let joined = std::iter::once(self.ffmpeg_command.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        masker.mask(&joined)
    }

    /// Native-rate read, endless loop, optional time limit ahead of `-i`
    fn add_input_args(&self, args: &mut Vec<String>, params: &StreamParams) {
        args.extend([
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-re".to_string(),
            "-stream_loop".to_string(),
            "-1".to_string(),
        ]);
        if let Some(limit) = params.duration_limit_secs {
            args.extend(["-t".to_string(), limit.to_string()]);
        }
        args.extend([
            "-i".to_string(),
            params.video_path.to_string_lossy().into_owned(),
        ]);
    }

    fn add_video_filter_args(&self, args: &mut Vec<String>, settings: &EncodeSettings, vertical: bool) {
        if vertical {
            args.extend(["-vf".to_string(), VERTICAL_SCALE_FILTER.to_string()]);
        } else if let Some(height) = settings.resolution.height() {
            // -2 keeps the aspect ratio with an even width
            args.extend(["-vf".to_string(), format!("scale=-2:{}", height)]);
        }
    }

    fn add_video_codec_args(&self, args: &mut Vec<String>, settings: &EncodeSettings) {
        let bitrate = format!("{}k", settings.video_bitrate_kbps);
        args.extend([
            "-c:v".to_string(),
            settings.video_codec.encoder().to_string(),
            "-preset".to_string(),
            settings.preset.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            format!("{}k", settings.buffer_size_kbps()),
            "-r".to_string(),
            settings.fps.to_string(),
            "-g".to_string(),
            settings.keyframe_interval().to_string(),
        ]);
    }

    fn add_audio_codec_args(&self, args: &mut Vec<String>, settings: &EncodeSettings) {
        args.extend([
            "-c:a".to_string(),
            settings.audio_codec.encoder().to_string(),
            "-b:a".to_string(),
            format!("{}k", settings.audio_bitrate_kbps),
            "-ar".to_string(),
            settings.audio_sample_rate.to_string(),
        ]);
    }

    /// FLV container to the RTMP endpoint
    fn add_output_args(&self, args: &mut Vec<String>, output_url: &str) {
        args.extend(["-f".to_string(), "flv".to_string(), output_url.to_string()]);
    }

    /// Run `<ffmpeg> -version` and extract the version string
    pub async fn check_available(&self) -> (bool, Option<String>) {
        match tokio::process::Command::new(&self.ffmpeg_command)
            .arg("-version")
            .output()
            .await
        {
            Ok(output) => {
                if output.status.success() {
                    let version_output = String::from_utf8_lossy(&output.stdout);

                    // "ffmpeg version 6.1.1-3ubuntu5 Copyright ..." -> "6.1.1-3ubuntu5"
                    let version = version_output.lines().next().and_then(|line| {
                        if line.starts_with("ffmpeg version") {
                            line.split_whitespace().nth(2).map(|v| v.to_string())
                        } else {
                            None
                        }
                    });

                    (true, version)
                } else {
                    warn!(
                        "FFmpeg command '{}' failed with status: {}",
                        self.ffmpeg_command, output.status
                    );
                    (false, None)
                }
            }
            Err(e) => {
                warn!(
                    "Failed to execute FFmpeg command '{}': {}",
                    self.ffmpeg_command, e
                );
                (false, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Resolution, VideoCodec, YOUTUBE_INGEST_BASE_URL};

    fn builder() -> FFmpegCommandBuilder {
        FFmpegCommandBuilder::new("ffmpeg", YOUTUBE_INGEST_BASE_URL)
    }

    fn params() -> StreamParams {
        StreamParams::new(
            "/videos/loop.mp4",
            StreamTarget::StreamKey("abcd-efgh-ijkl-mnop".to_string()),
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_default_command_line() {
        let args = builder().build_args(&params());

        assert_eq!(value_after(&args, "-stream_loop"), Some("-1"));
        assert!(args.contains(&"-re".to_string()));
        assert_eq!(value_after(&args, "-i"), Some("/videos/loop.mp4"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-b:v"), Some("2500k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("5000k"));
        assert_eq!(value_after(&args, "-r"), Some("30"));
        assert_eq!(value_after(&args, "-g"), Some("60"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert_eq!(value_after(&args, "-vf"), Some("scale=-2:1080"));
        assert_eq!(value_after(&args, "-f"), Some("flv"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("rtmp://a.rtmp.youtube.com/live2/abcd-efgh-ijkl-mnop")
        );
        assert!(!args.contains(&"-t".to_string()));
    }

    #[test]
    fn test_duration_limit_precedes_input() {
        let mut params = params();
        params.duration_limit_secs = Some(5);
        let args = builder().build_args(&params);

        let t = args.iter().position(|a| a == "-t").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(t < i);
        assert_eq!(args[t + 1], "5");
    }

    #[test]
    fn test_vertical_mode_overrides_resolution() {
        let mut params = params();
        params.vertical = true;
        params.settings.resolution = Resolution::P720;
        let args = builder().build_args(&params);
        assert_eq!(value_after(&args, "-vf"), Some(VERTICAL_SCALE_FILTER));
        assert_eq!(args.iter().filter(|a| *a == "-vf").count(), 1);
    }

    #[test]
    fn test_source_resolution_has_no_filter() {
        let mut params = params();
        params.settings.resolution = Resolution::Source;
        params.settings.video_codec = VideoCodec::H265;
        params.settings.video_bitrate_kbps = 4000;
        params.settings.fps = 60;
        let args = builder().build_args(&params);
        assert!(!args.contains(&"-vf".to_string()));
        assert_eq!(value_after(&args, "-c:v"), Some("libx265"));
        assert_eq!(value_after(&args, "-bufsize"), Some("8000k"));
        assert_eq!(value_after(&args, "-g"), Some("120"));
    }

    #[test]
    fn test_explicit_url_used_verbatim() {
        let mut params = params();
        params.target = StreamTarget::ExplicitUrl("rtmp://backup.example/live/zzzz-9999".to_string());
        let args = builder().build_args(&params);
        assert_eq!(
            args.last().map(String::as_str),
            Some("rtmp://backup.example/live/zzzz-9999")
        );
    }

    #[test]
    fn test_summary_masks_output() {
        let builder = builder();
        let params = params();
        let args = builder.build_args(&params);
        let url = builder.resolve_output_url(&params.target);
        let masker = LogMasker::new(&url, &params.target);

        let summary = builder.summary(&args, &masker);
        assert!(summary.starts_with("ffmpeg -hide_banner"));
        assert!(!summary.contains("abcd-efgh-ijkl-mnop"));
        assert!(summary.ends_with("rtmp://a.rtmp.youtube.com/live2/****"));
    }

    #[test]
    fn test_builds_are_deterministic() {
        let builder = builder();
        assert_eq!(builder.build_args(&params()), builder.build_args(&params()));
    }
}
