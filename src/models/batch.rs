//! Batch lifecycle models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a batch: Idle -> Running -> {Stopped, Failed}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    #[default]
    Idle,
    Running,
    Stopped,
    Failed,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Stopped | BatchState::Failed)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchState::Idle => "idle",
            BatchState::Running => "running",
            BatchState::Stopped => "stopped",
            BatchState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Read-only snapshot of a batch, detached from the live record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchView {
    pub batch_index: u32,
    pub state: BatchState,
    pub start_time: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub video_path: PathBuf,
    /// Masked output URL, safe for display
    pub target_display: String,
    pub duration_limit_secs: Option<u64>,
    pub failure: Option<String>,
    pub log_tail: Vec<String>,
}

impl BatchView {
    /// Seconds since start, up to the end time for finished batches
    pub fn uptime_seconds(&self) -> Option<i64> {
        let start = self.start_time?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some((end - start).num_seconds().max(0))
    }
}
