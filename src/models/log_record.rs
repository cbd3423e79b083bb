//! Persisted log records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Info,
    Error,
    Ffmpeg,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogType::Info => "INFO",
            LogType::Error => "ERROR",
            LogType::Ffmpeg => "FFMPEG",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogType::Info),
            "ERROR" => Ok(LogType::Error),
            "FFMPEG" => Ok(LogType::Ffmpeg),
            _ => Err(format!("Unknown log type: {}", s)),
        }
    }
}

/// One immutable log line. `stream_key` only ever holds the masked form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub batch_index: Option<u32>,
    pub log_type: LogType,
    pub message: String,
    pub video_path: Option<String>,
    pub stream_key: Option<String>,
    pub channel_name: Option<String>,
}

impl LogRecord {
    pub fn new(session_id: impl Into<String>, log_type: LogType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            batch_index: None,
            log_type,
            message: message.into(),
            video_path: None,
            stream_key: None,
            channel_name: None,
        }
    }

    pub fn with_batch(mut self, batch_index: u32) -> Self {
        self.batch_index = Some(batch_index);
        self
    }

    /// Line as shown in a batch's live tail
    pub fn display_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.log_type,
            self.message
        )
    }
}
