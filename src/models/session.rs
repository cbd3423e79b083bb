//! Session and saved-channel models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stream::EncodeSettings;

/// Metadata recorded for a session so a later run can resume with the same
/// video, title, channel and encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMetadata {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub video_name: Option<String>,
    pub stream_title: Option<String>,
    pub stream_description: Option<String>,
    pub channel_name: Option<String>,
    pub batch_indices: Vec<u32>,
    pub settings: Option<EncodeSettings>,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            video_name: None,
            stream_title: None,
            stream_description: None,
            channel_name: None,
            batch_indices: Vec::new(),
            settings: None,
        }
    }
}

/// A YouTube channel whose OAuth credentials were kept for reuse
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedChannel {
    pub channel_name: String,
    pub channel_id: String,
    /// Serialized OAuth tokens
    pub auth_json: String,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}
