//! Saved Channel Repository

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::{PersistenceError, PersistenceResult};
use crate::models::SavedChannel;
use crate::repositories::traits::ChannelStore;
use crate::utils::{format_datetime, parse_datetime};

const TABLE: &str = "saved_channels";

pub struct ChannelRepository {
    pool: SqlitePool,
}

impl ChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_channel(row: &sqlx::sqlite::SqliteRow) -> PersistenceResult<SavedChannel> {
        let created_at: String = row.get("created_at");
        let last_used: String = row.get("last_used");

        Ok(SavedChannel {
            channel_name: row.get("channel_name"),
            channel_id: row.get("channel_id"),
            auth_json: row.get("auth_json"),
            created_at: parse_datetime(&created_at)
                .map_err(|e| PersistenceError::query_failed(TABLE, e))?,
            last_used: parse_datetime(&last_used)
                .map_err(|e| PersistenceError::query_failed(TABLE, e))?,
        })
    }
}

#[async_trait]
impl ChannelStore for ChannelRepository {
    async fn save_channel(&self, channel: &SavedChannel) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO saved_channels (channel_name, channel_id, auth_json, created_at, last_used)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(channel_name) DO UPDATE SET
                channel_id = excluded.channel_id,
                auth_json = excluded.auth_json,
                last_used = excluded.last_used
            "#,
        )
        .bind(&channel.channel_name)
        .bind(&channel.channel_id)
        .bind(&channel.auth_json)
        .bind(format_datetime(&channel.created_at))
        .bind(format_datetime(&channel.last_used))
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::write_failed(TABLE, e))?;

        Ok(())
    }

    async fn list_channels(&self) -> PersistenceResult<Vec<SavedChannel>> {
        let rows = sqlx::query("SELECT * FROM saved_channels ORDER BY last_used DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::query_failed(TABLE, e))?;

        rows.iter().map(Self::row_to_channel).collect()
    }

    async fn find_channel(&self, channel_name: &str) -> PersistenceResult<Option<SavedChannel>> {
        let row = sqlx::query("SELECT * FROM saved_channels WHERE channel_name = ?")
            .bind(channel_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::query_failed(TABLE, e))?;

        row.as_ref().map(Self::row_to_channel).transpose()
    }

    async fn touch_channel(&self, channel_name: &str) -> PersistenceResult<bool> {
        let result = sqlx::query("UPDATE saved_channels SET last_used = ? WHERE channel_name = ?")
            .bind(format_datetime(&Utc::now()))
            .bind(channel_name)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::write_failed(TABLE, e))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use chrono::Duration;

    fn channel(name: &str, minutes_ago: i64) -> SavedChannel {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        SavedChannel {
            channel_name: name.to_string(),
            channel_id: format!("UC{}", name),
            auth_json: r#"{"access_token":"x"}"#.to_string(),
            created_at: at,
            last_used: at,
        }
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let database = Database::in_memory().await.unwrap();
        let repo = ChannelRepository::new(database.pool());

        repo.save_channel(&channel("alpha", 30)).await.unwrap();
        repo.save_channel(&channel("beta", 5)).await.unwrap();

        let channels = repo.list_channels().await.unwrap();
        assert_eq!(channels[0].channel_name, "beta");

        assert!(repo.touch_channel("alpha").await.unwrap());
        assert!(!repo.touch_channel("gamma").await.unwrap());

        let channels = repo.list_channels().await.unwrap();
        assert_eq!(channels[0].channel_name, "alpha");

        let found = repo.find_channel("beta").await.unwrap().unwrap();
        assert_eq!(found.channel_id, "UCbeta");
        assert!(repo.find_channel("gamma").await.unwrap().is_none());
    }
}
