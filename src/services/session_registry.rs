//! Session registry
//!
//! One session per process lifetime. The identifier is created on first use
//! and never changes afterwards; metadata for it, and for earlier sessions,
//! goes through the [`SessionStore`].

use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::errors::PersistenceResult;
use crate::models::{SessionMetadata, StreamParams};
use crate::repositories::SessionStore;
use crate::utils::generate_session_id;

pub struct SessionRegistry {
    session_id: OnceLock<String>,
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            session_id: OnceLock::new(),
            store,
        }
    }

    pub fn current_session_id(&self) -> &str {
        self.session_id.get_or_init(|| {
            let id = generate_session_id(Utc::now());
            debug!(session_id = %id, "Created session");
            id
        })
    }

    /// Insert or replace, stamping `updated_at`
    pub async fn save(&self, metadata: &SessionMetadata) -> PersistenceResult<()> {
        let mut metadata = metadata.clone();
        metadata.updated_at = Utc::now();
        self.store.save(&metadata).await
    }

    /// All sessions, most recently updated first
    pub async fn load_all(&self) -> PersistenceResult<Vec<SessionMetadata>> {
        self.store.load_all().await
    }

    /// Stored metadata for the current session, or a fresh record
    pub async fn current(&self) -> PersistenceResult<SessionMetadata> {
        let id = self.current_session_id();
        Ok(self
            .store
            .load_all()
            .await?
            .into_iter()
            .find(|s| s.session_id == id)
            .unwrap_or_else(|| SessionMetadata::new(id)))
    }

    /// Most recent session other than this one, for resuming
    pub async fn latest_previous(&self) -> PersistenceResult<Option<SessionMetadata>> {
        let id = self.current_session_id();
        Ok(self
            .store
            .load_all()
            .await?
            .into_iter()
            .find(|s| s.session_id != id))
    }

    /// Associate a started batch with the current session
    pub async fn record_batch(
        &self,
        batch_index: u32,
        params: &StreamParams,
        stream_title: Option<&str>,
    ) -> PersistenceResult<SessionMetadata> {
        let mut metadata = self.current().await?;

        if !metadata.batch_indices.contains(&batch_index) {
            metadata.batch_indices.push(batch_index);
            metadata.batch_indices.sort_unstable();
        }
        metadata.video_name = Path::new(&params.video_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        metadata.settings = Some(params.settings.clone());
        if params.channel_name.is_some() {
            metadata.channel_name = params.channel_name.clone();
        }
        if let Some(title) = stream_title {
            metadata.stream_title = Some(title.to_string());
        }

        self.save(&metadata).await?;
        Ok(metadata)
    }
}
