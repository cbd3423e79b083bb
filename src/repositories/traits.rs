//! Persistence traits consumed by the core

use async_trait::async_trait;

use crate::errors::PersistenceResult;
use crate::models::{LogRecord, SavedChannel, SessionMetadata};

/// Append-only log store
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist one record. Records are never updated or deleted here.
    async fn append(&self, record: &LogRecord) -> PersistenceResult<()>;

    /// Most recent first, optionally restricted to one session
    async fn query(&self, session_id: Option<&str>, limit: u32) -> PersistenceResult<Vec<LogRecord>>;
}

/// Session metadata store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the metadata for `metadata.session_id`
    async fn save(&self, metadata: &SessionMetadata) -> PersistenceResult<()>;

    /// All sessions, most recently updated first
    async fn load_all(&self) -> PersistenceResult<Vec<SessionMetadata>>;
}

/// Saved channel credentials
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn save_channel(&self, channel: &SavedChannel) -> PersistenceResult<()>;

    /// Most recently used first
    async fn list_channels(&self) -> PersistenceResult<Vec<SavedChannel>>;

    async fn find_channel(&self, channel_name: &str) -> PersistenceResult<Option<SavedChannel>>;

    /// Bump `last_used`; returns false when the channel is unknown
    async fn touch_channel(&self, channel_name: &str) -> PersistenceResult<bool>;
}
