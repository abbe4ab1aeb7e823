//! SQLite-backed implementation of the queue store port.

use std::sync::Arc;

use async_trait::async_trait;
use moodlog_core::QueueStore;
use moodlog_domain::{MoodlogError, QueueItem, Result as DomainResult, UploadStatus};
use rusqlite::{params, Row, ToSql};
use tokio::task;
use tracing::warn;

use super::manager::{map_sql_error, DbConnection, DbManager};

/// SQLite-backed queue repository.
pub struct SqliteQueueStore {
    db: Arc<DbManager>,
}

impl SqliteQueueStore {
    /// Construct a repository backed by the shared database manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    async fn with_connection<T, F>(&self, op: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DbConnection) -> DomainResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<T> {
            let conn = db.get_connection()?;
            op(&conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, item: &QueueItem) -> DomainResult<()> {
        let item = item.clone();
        self.with_connection(move |conn| {
            conn.execute(
                QUEUE_INSERT_SQL,
                params![
                    item.id,
                    item.session_id,
                    item.timestamp,
                    item.emotion_score,
                    item.latitude,
                    item.longitude,
                    item.video_uri,
                    item.status.to_string(),
                    i64::from(item.retry_count),
                    item.error_message,
                    item.created_at,
                    item.next_retry_at,
                    item.uploaded_at,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn mark_uploading(&self, id: &str) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE checkin_queue SET status = 'uploading' WHERE id = ?1",
                    params![id],
                )
                .map_err(map_sql_error)?;
            require_row(changed, &id)
        })
        .await
    }

    async fn mark_completed(&self, id: &str, uploaded_at: i64) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE checkin_queue
                     SET status = 'completed', uploaded_at = ?2, error_message = NULL
                     WHERE id = ?1",
                    params![id, uploaded_at],
                )
                .map_err(map_sql_error)?;
            require_row(changed, &id)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        retry_count: u32,
        error: Option<&str>,
        next_retry_at: i64,
    ) -> DomainResult<()> {
        let id = id.to_string();
        let error = error.map(str::to_string);
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE checkin_queue
                     SET status = 'failed', retry_count = ?2, error_message = ?3, next_retry_at = ?4
                     WHERE id = ?1",
                    params![id, i64::from(retry_count), error, next_retry_at],
                )
                .map_err(map_sql_error)?;
            require_row(changed, &id)
        })
        .await
    }

    async fn reset_to_pending(&self, id: &str) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE checkin_queue SET status = 'pending', next_retry_at = 0 WHERE id = ?1",
                    params![id],
                )
                .map_err(map_sql_error)?;
            require_row(changed, &id)
        })
        .await
    }

    async fn reset_for_retry(&self, id: &str) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE checkin_queue
                     SET status = 'pending', retry_count = 0, error_message = NULL, next_retry_at = 0
                     WHERE id = ?1",
                    params![id],
                )
                .map_err(map_sql_error)?;
            require_row(changed, &id)
        })
        .await
    }

    async fn fetch_batch(
        &self,
        statuses: &[UploadStatus],
        limit: usize,
        offset: usize,
    ) -> DomainResult<Vec<QueueItem>> {
        if statuses.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let status_strings: Vec<String> = statuses.iter().map(ToString::to_string).collect();
        self.with_connection(move |conn| {
            let placeholders = (1..=status_strings.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "{QUEUE_SELECT_SQL} WHERE status IN ({placeholders})
                 ORDER BY created_at ASC
                 LIMIT ?{} OFFSET ?{}",
                status_strings.len() + 1,
                status_strings.len() + 2,
            );

            let limit = usize_to_i64(limit);
            let offset = usize_to_i64(offset);
            let mut bound: Vec<&dyn ToSql> =
                status_strings.iter().map(|s| s as &dyn ToSql).collect();
            bound.push(&limit);
            bound.push(&offset);

            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(bound.as_slice(), map_queue_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
    }

    async fn load_active(&self) -> DomainResult<Vec<QueueItem>> {
        self.with_connection(move |conn| {
            let sql = format!(
                "{QUEUE_SELECT_SQL} WHERE status != 'completed' ORDER BY created_at ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = stmt
                .query_map([], map_queue_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            Ok(rows)
        })
        .await
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let id = id.to_string();
        self.with_connection(move |conn| {
            conn.execute("DELETE FROM checkin_queue WHERE id = ?1", params![id])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }

    async fn delete_all(&self) -> DomainResult<()> {
        self.with_connection(move |conn| {
            conn.execute("DELETE FROM checkin_queue", []).map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

const QUEUE_INSERT_SQL: &str = "INSERT INTO checkin_queue (
        id, session_id, timestamp, emotion_score, latitude, longitude, video_uri,
        status, retry_count, error_message, created_at, next_retry_at, uploaded_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const QUEUE_SELECT_SQL: &str = "SELECT
        id, session_id, timestamp, emotion_score, latitude, longitude, video_uri,
        status, retry_count, error_message, created_at, next_retry_at, uploaded_at
    FROM checkin_queue";

fn map_queue_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let id: String = row.get(0)?;
    let status_raw: String = row.get(7)?;
    let status = parse_status(&id, &status_raw);
    let retry_count: i64 = row.get(8)?;

    Ok(QueueItem {
        id,
        session_id: row.get(1)?,
        timestamp: row.get(2)?,
        emotion_score: row.get(3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        video_uri: row.get(6)?,
        status,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        error_message: row.get(9)?,
        created_at: row.get(10)?,
        next_retry_at: row.get(11)?,
        uploaded_at: row.get(12)?,
    })
}

fn parse_status(id: &str, raw: &str) -> UploadStatus {
    match raw.parse::<UploadStatus>() {
        Ok(status) => status,
        Err(err) => {
            warn!(
                item_id = %id,
                raw_status = %raw,
                error = %err,
                "invalid queue status in database, defaulting to pending"
            );
            UploadStatus::Pending
        }
    }
}

fn require_row(changed: usize, id: &str) -> DomainResult<()> {
    if changed == 0 {
        return Err(MoodlogError::NotFound(format!("queue item {id}")));
    }
    Ok(())
}

fn map_join_error(err: task::JoinError) -> MoodlogError {
    if err.is_cancelled() {
        MoodlogError::Internal("queue store task cancelled".into())
    } else {
        MoodlogError::Internal(format!("queue store task panic: {err}"))
    }
}

fn usize_to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
