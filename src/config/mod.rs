use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{EncodeSettings, YOUTUBE_INGEST_BASE_URL};
use crate::services::DEFAULT_LOG_TAIL_CAPACITY;

/// Environment variable prefix, e.g. `YTLIVE__FFMPEG__COMMAND=/usr/local/bin/ffmpeg`
pub const ENV_PREFIX: &str = "YTLIVE";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ffmpeg: FfmpegConfig,
    pub streaming: StreamingConfig,
    pub youtube: YouTubeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Transcoder executable
    pub command: String,
    /// Base URL a bare stream key is appended to
    pub ingest_base_url: String,
    /// How long to wait for the process to exit after a kill
    pub stop_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub log_tail_capacity: usize,
    /// Bounded queue between batch tasks and the log writer
    pub log_channel_capacity: usize,
    /// Finished batch snapshots kept in memory
    pub history_capacity: usize,
    pub default_settings: EncodeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub api_base_url: String,
    pub scopes: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./yt-live-relay.db".to_string(),
            max_connections: Some(5),
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            command: "ffmpeg".to_string(),
            ingest_base_url: YOUTUBE_INGEST_BASE_URL.to_string(),
            stop_timeout_seconds: 10,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            log_tail_capacity: DEFAULT_LOG_TAIL_CAPACITY,
            log_channel_capacity: 1024,
            history_capacity: 50,
            default_settings: EncodeSettings::default(),
        }
    }
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/youtube.force-ssl".to_string()],
        }
    }
}

impl Config {
    /// Layer defaults, the TOML file and `YTLIVE__` environment variables.
    /// A missing file is created with the defaults.
    pub fn load(config_file: &str) -> Result<Self> {
        if !Path::new(config_file).exists() {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = Path::new(config_file).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(config_file, contents)?;
        }

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::new(config_file, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ffmpeg.command.trim().is_empty() {
            anyhow::bail!("ffmpeg.command must not be empty");
        }
        if !(1..=DEFAULT_LOG_TAIL_CAPACITY).contains(&self.streaming.log_tail_capacity) {
            anyhow::bail!(
                "streaming.log_tail_capacity must be between 1 and {}",
                DEFAULT_LOG_TAIL_CAPACITY
            );
        }
        if self.streaming.log_channel_capacity == 0 {
            anyhow::bail!("streaming.log_channel_capacity must be at least 1");
        }
        self.streaming
            .default_settings
            .validate()
            .map_err(|e| anyhow::anyhow!("streaming.default_settings: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        let config = Config::load(path_str).unwrap();
        assert!(path.exists());
        assert_eq!(config.ffmpeg.command, "ffmpeg");
        assert_eq!(config.streaming.log_tail_capacity, 100);
        assert_eq!(config.ffmpeg.ingest_base_url, YOUTUBE_INGEST_BASE_URL);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            r#"
[ffmpeg]
command = "/opt/ffmpeg/bin/ffmpeg"

[streaming.default_settings]
fps = 60
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.ffmpeg.command, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.ffmpeg.stop_timeout_seconds, 10);
        assert_eq!(config.streaming.default_settings.fps, 60);
        assert_eq!(config.streaming.default_settings.video_bitrate_kbps, 2500);
    }

    #[test]
    fn test_invalid_defaults_rejected() {
        let mut config = Config::default();
        config.streaming.default_settings.fps = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_tail_capacity_above_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[streaming]\nlog_tail_capacity = 500\n").unwrap();

        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("log_tail_capacity"), "{}", err);

        let mut config = Config::default();
        config.streaming.log_tail_capacity = 100;
        assert!(config.validate().is_ok());
    }
}
