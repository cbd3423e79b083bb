//! Log Record Repository
//!
//! SQLite-backed [`LogSink`]. Timestamps are stored as RFC3339 text.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::errors::{PersistenceError, PersistenceResult};
use crate::models::{LogRecord, LogType};
use crate::repositories::traits::LogSink;
use crate::utils::{format_datetime, parse_datetime};

const TABLE: &str = "stream_logs";

pub struct LogRecordRepository {
    pool: SqlitePool,
}

impl LogRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> PersistenceResult<LogRecord> {
        let timestamp: String = row.get("timestamp");
        let log_type: String = row.get("log_type");
        let batch_index: Option<i64> = row.get("batch_index");

        Ok(LogRecord {
            timestamp: parse_datetime(&timestamp)
                .map_err(|e| PersistenceError::query_failed(TABLE, e))?,
            session_id: row.get("session_id"),
            batch_index: batch_index.map(|i| i as u32),
            log_type: log_type
                .parse::<LogType>()
                .map_err(|e| PersistenceError::query_failed(TABLE, e))?,
            message: row.get("message"),
            video_path: row.get("video_path"),
            stream_key: row.get("stream_key"),
            channel_name: row.get("channel_name"),
        })
    }
}

#[async_trait]
impl LogSink for LogRecordRepository {
    async fn append(&self, record: &LogRecord) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stream_logs (
                timestamp, session_id, batch_index, log_type, message,
                video_path, stream_key, channel_name
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_datetime(&record.timestamp))
        .bind(&record.session_id)
        .bind(record.batch_index.map(i64::from))
        .bind(record.log_type.to_string())
        .bind(&record.message)
        .bind(&record.video_path)
        .bind(&record.stream_key)
        .bind(&record.channel_name)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::write_failed(TABLE, e))?;

        Ok(())
    }

    async fn query(&self, session_id: Option<&str>, limit: u32) -> PersistenceResult<Vec<LogRecord>> {
        let rows = match session_id {
            Some(session_id) => {
                sqlx::query(
                    "SELECT * FROM stream_logs WHERE session_id = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(session_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM stream_logs ORDER BY id DESC LIMIT ?")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| PersistenceError::query_failed(TABLE, e))?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[tokio::test]
    async fn test_append_and_query_most_recent_first() {
        let database = Database::in_memory().await.unwrap();
        let repo = LogRecordRepository::new(database.pool());

        for i in 0..5 {
            let mut record = LogRecord::new("session-a", LogType::Ffmpeg, format!("line {}", i))
                .with_batch(1);
            record.stream_key = Some("abcd****".to_string());
            repo.append(&record).await.unwrap();
        }
        repo.append(&LogRecord::new("session-b", LogType::Info, "other"))
            .await
            .unwrap();

        let records = repo.query(Some("session-a"), 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "line 4");
        assert_eq!(records[2].message, "line 2");
        assert_eq!(records[0].batch_index, Some(1));
        assert_eq!(records[0].stream_key.as_deref(), Some("abcd****"));

        let all = repo.query(None, 100).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].session_id, "session-b");
        assert_eq!(all[0].batch_index, None);
    }
}
