//! Session Repository

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::errors::{PersistenceError, PersistenceResult};
use crate::models::{EncodeSettings, SessionMetadata};
use crate::repositories::traits::SessionStore;
use crate::utils::{format_datetime, parse_datetime};

const TABLE: &str = "stream_sessions";

pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> PersistenceResult<SessionMetadata> {
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        let batch_indices: String = row.get("batch_indices");
        let settings: Option<String> = row.get("settings");

        Ok(SessionMetadata {
            session_id: row.get("session_id"),
            created_at: parse_datetime(&created_at)
                .map_err(|e| PersistenceError::query_failed(TABLE, e))?,
            updated_at: parse_datetime(&updated_at)
                .map_err(|e| PersistenceError::query_failed(TABLE, e))?,
            video_name: row.get("video_name"),
            stream_title: row.get("stream_title"),
            stream_description: row.get("stream_description"),
            channel_name: row.get("channel_name"),
            batch_indices: serde_json::from_str(&batch_indices)?,
            settings: settings
                .map(|s| serde_json::from_str::<EncodeSettings>(&s))
                .transpose()?,
        })
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn save(&self, metadata: &SessionMetadata) -> PersistenceResult<()> {
        let batch_indices = serde_json::to_string(&metadata.batch_indices)?;
        let settings = metadata
            .settings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO stream_sessions (
                session_id, created_at, updated_at, video_name, stream_title,
                stream_description, channel_name, batch_indices, settings
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                video_name = excluded.video_name,
                stream_title = excluded.stream_title,
                stream_description = excluded.stream_description,
                channel_name = excluded.channel_name,
                batch_indices = excluded.batch_indices,
                settings = excluded.settings
            "#,
        )
        .bind(&metadata.session_id)
        .bind(format_datetime(&metadata.created_at))
        .bind(format_datetime(&metadata.updated_at))
        .bind(&metadata.video_name)
        .bind(&metadata.stream_title)
        .bind(&metadata.stream_description)
        .bind(&metadata.channel_name)
        .bind(batch_indices)
        .bind(settings)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::write_failed(TABLE, e))?;

        Ok(())
    }

    async fn load_all(&self) -> PersistenceResult<Vec<SessionMetadata>> {
        let rows = sqlx::query("SELECT * FROM stream_sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::query_failed(TABLE, e))?;

        rows.iter().map(Self::row_to_metadata).collect()
    }
}
