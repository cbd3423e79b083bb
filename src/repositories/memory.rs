//! In-memory persistence
//!
//! Used when the SQLite store cannot be created at startup, so streaming
//! keeps working with logs that only live as long as the process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::PersistenceResult;
use crate::models::{LogRecord, SavedChannel, SessionMetadata};
use crate::repositories::traits::{ChannelStore, LogSink, SessionStore};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    logs: Arc<RwLock<Vec<LogRecord>>>,
    sessions: Arc<RwLock<HashMap<String, SessionMetadata>>>,
    channels: Arc<RwLock<HashMap<String, SavedChannel>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogSink for InMemoryStore {
    async fn append(&self, record: &LogRecord) -> PersistenceResult<()> {
        self.logs.write().await.push(record.clone());
        Ok(())
    }

    async fn query(&self, session_id: Option<&str>, limit: u32) -> PersistenceResult<Vec<LogRecord>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .filter(|r| session_id.map_or(true, |id| r.session_id == id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn save(&self, metadata: &SessionMetadata) -> PersistenceResult<()> {
        self.sessions
            .write()
            .await
            .insert(metadata.session_id.clone(), metadata.clone());
        Ok(())
    }

    async fn load_all(&self) -> PersistenceResult<Vec<SessionMetadata>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

#[async_trait]
impl ChannelStore for InMemoryStore {
    async fn save_channel(&self, channel: &SavedChannel) -> PersistenceResult<()> {
        let mut channels = self.channels.write().await;
        let created_at = channels
            .get(&channel.channel_name)
            .map(|existing| existing.created_at)
            .unwrap_or(channel.created_at);
        let mut channel = channel.clone();
        channel.created_at = created_at;
        channels.insert(channel.channel_name.clone(), channel);
        Ok(())
    }

    async fn list_channels(&self) -> PersistenceResult<Vec<SavedChannel>> {
        let mut channels: Vec<_> = self.channels.read().await.values().cloned().collect();
        channels.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(channels)
    }

    async fn find_channel(&self, channel_name: &str) -> PersistenceResult<Option<SavedChannel>> {
        Ok(self.channels.read().await.get(channel_name).cloned())
    }

    async fn touch_channel(&self, channel_name: &str) -> PersistenceResult<bool> {
        match self.channels.write().await.get_mut(channel_name) {
            Some(channel) => {
                channel.last_used = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogType;

    #[tokio::test]
    async fn test_query_filters_and_limits() {
        let store = InMemoryStore::new();
        for i in 0..4 {
            let session = if i % 2 == 0 { "even" } else { "odd" };
            store
                .append(&LogRecord::new(session, LogType::Info, format!("msg {}", i)))
                .await
                .unwrap();
        }

        let even = store.query(Some("even"), 10).await.unwrap();
        assert_eq!(
            even.iter().map(|r| r.message.as_str()).collect::<Vec<_>>(),
            vec!["msg 2", "msg 0"]
        );

        let latest = store.query(None, 1).await.unwrap();
        assert_eq!(latest[0].message, "msg 3");
    }
}
