//! Repository for the durable upload queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

use super::types::{NewUploadItem, QueueStatus, UploadItem, UploadStatus};
use crate::errors::{DbError, DomainError, DomainResult};

#[async_trait]
pub trait UploadQueueRepository: Send + Sync {
    /// Persist a new item with status `pending`
    async fn enqueue(&self, new_item: NewUploadItem) -> DomainResult<UploadItem>;

    /// Fetch every queued item, oldest first
    async fn get_all(&self) -> DomainResult<Vec<UploadItem>>;

    /// Fetch items with a given status, oldest first
    async fn get_all_by_status(&self, status: UploadStatus) -> DomainResult<Vec<UploadItem>>;

    /// Fetch a single item by id
    async fn get_by_id(&self, id: Uuid) -> DomainResult<Option<UploadItem>>;

    /// Atomically claim the oldest pending item for processing.
    ///
    /// The `pending -> uploading` transition only succeeds if the item is
    /// still pending, so overlapping processing cycles cannot claim the
    /// same item twice.
    async fn claim_next_pending(&self) -> DomainResult<Option<UploadItem>>;

    /// Requeue items a previous session left in `uploading`:
    /// `uploading -> pending`, without touching `retry_count`. Returns the
    /// number of rows requeued. Only safe before any claims are made.
    async fn reclaim_interrupted(&self) -> DomainResult<u64>;

    /// Mark a claimed item as completed
    async fn mark_completed(&self, id: Uuid) -> DomainResult<()>;

    /// Record a failed attempt, incrementing `retry_count`.
    /// Returns the new retry count.
    async fn mark_error(&self, id: Uuid, error_message: &str) -> DomainResult<i32>;

    /// Automated backoff reset: `error -> pending`, conditional on the item
    /// still being in the error state with the expected retry count.
    async fn reset_for_retry(&self, id: Uuid, expected_retry_count: i32) -> DomainResult<bool>;

    /// User-triggered retry of a terminal item: `error -> pending`
    async fn retry_item(&self, id: Uuid) -> DomainResult<bool>;

    /// Remove completed items. Returns the number of rows removed.
    async fn clear_completed(&self) -> DomainResult<u64>;

    /// Recompute per-status counts
    async fn queue_status(&self) -> DomainResult<QueueStatus>;
}

pub struct SqliteUploadQueueRepository {
    pool: Pool<Sqlite>,
}

impl SqliteUploadQueueRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> DomainResult<UploadItem> {
        let id_str: String = row.try_get("id").map_err(DbError::from)?;
        let id = Uuid::parse_str(&id_str).map_err(|_| DomainError::InvalidUuid(id_str))?;

        let target_record_id_str: String =
            row.try_get("target_record_id").map_err(DbError::from)?;
        let target_record_id = Uuid::parse_str(&target_record_id_str)
            .map_err(|_| DomainError::InvalidUuid(target_record_id_str))?;

        let status_str: String = row.try_get("status").map_err(DbError::from)?;
        let status = UploadStatus::from_str(&status_str)?;

        let created_at = parse_datetime(row.try_get("created_at").map_err(DbError::from)?)?;
        let updated_at = parse_datetime(row.try_get("updated_at").map_err(DbError::from)?)?;
        let completed_at = row
            .try_get::<Option<String>, _>("completed_at")
            .map_err(DbError::from)?
            .map(parse_datetime)
            .transpose()?;

        Ok(UploadItem {
            id,
            payload: row.try_get("payload").map_err(DbError::from)?,
            target_record_id,
            target_field: row.try_get("target_field").map_err(DbError::from)?,
            file_name: row.try_get("file_name").map_err(DbError::from)?,
            content_type: row.try_get("content_type").map_err(DbError::from)?,
            status,
            retry_count: row.try_get("retry_count").map_err(DbError::from)?,
            priority: row.try_get("priority").map_err(DbError::from)?,
            created_at,
            updated_at,
            completed_at,
            error_message: row.try_get("error_message").map_err(DbError::from)?,
        })
    }
}

fn parse_datetime(value: String) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::Internal(format!("Invalid date format: {}", value)))
}

const ITEM_COLUMNS: &str = "id, payload, target_record_id, target_field, file_name, \
     content_type, status, retry_count, priority, created_at, updated_at, \
     completed_at, error_message";

#[async_trait]
impl UploadQueueRepository for SqliteUploadQueueRepository {
    async fn enqueue(&self, new_item: NewUploadItem) -> DomainResult<UploadItem> {
        let id = Uuid::new_v4();
        let now_str = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO upload_queue
             (id, payload, target_record_id, target_field, file_name, content_type,
              status, retry_count, priority, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&new_item.payload)
        .bind(new_item.target_record_id.to_string())
        .bind(&new_item.target_field)
        .bind(&new_item.file_name)
        .bind(&new_item.content_type)
        .bind(i32::from(new_item.priority))
        .bind(&now_str)
        .bind(&now_str)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        self.get_by_id(id).await?.ok_or_else(|| {
            DomainError::Database(DbError::NotFound("upload_queue".into(), id.to_string()))
        })
    }

    async fn get_all(&self) -> DomainResult<Vec<UploadItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM upload_queue ORDER BY created_at ASC",
            ITEM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn get_all_by_status(&self, status: UploadStatus) -> DomainResult<Vec<UploadItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM upload_queue WHERE status = ? ORDER BY created_at ASC",
            ITEM_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn get_by_id(&self, id: Uuid) -> DomainResult<Option<UploadItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM upload_queue WHERE id = ?",
            ITEM_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn claim_next_pending(&self) -> DomainResult<Option<UploadItem>> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        let candidate = sqlx::query(
            "SELECT id FROM upload_queue
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC
             LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let id_str: String = match candidate {
            Some(row) => row.try_get("id").map_err(DbError::from)?,
            None => {
                tx.commit().await.map_err(DbError::from)?;
                return Ok(None);
            }
        };

        // Conditional transition; a concurrent cycle that won the race leaves
        // zero rows affected and we report no claim.
        let updated_at_str = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE upload_queue
             SET status = 'uploading', updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(&updated_at_str)
        .bind(&id_str)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            tx.commit().await.map_err(DbError::from)?;
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM upload_queue WHERE id = ?",
            ITEM_COLUMNS
        ))
        .bind(&id_str)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let item = Self::map_row(&row)?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(Some(item))
    }

    async fn reclaim_interrupted(&self) -> DomainResult<u64> {
        let now_str = Utc::now().to_rfc3339();
        // An interrupted transfer is not a failed attempt, so retry_count
        // stays where it was.
        let result = sqlx::query(
            "UPDATE upload_queue
             SET status = 'pending', updated_at = ?
             WHERE status = 'uploading'",
        )
        .bind(&now_str)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn mark_completed(&self, id: Uuid) -> DomainResult<()> {
        let now_str = Utc::now().to_rfc3339();
        // Guarded on status so duplicate completion notifications are no-ops
        sqlx::query(
            "UPDATE upload_queue
             SET status = 'completed', completed_at = ?, updated_at = ?, error_message = NULL
             WHERE id = ? AND status = 'uploading'",
        )
        .bind(&now_str)
        .bind(&now_str)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    async fn mark_error(&self, id: Uuid, error_message: &str) -> DomainResult<i32> {
        let now_str = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE upload_queue
             SET status = 'error', retry_count = retry_count + 1,
                 error_message = ?, updated_at = ?
             WHERE id = ? AND status = 'uploading'",
        )
        .bind(error_message)
        .bind(&now_str)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        let row = sqlx::query("SELECT retry_count FROM upload_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;

        match row {
            Some(row) => Ok(row.try_get("retry_count").map_err(DbError::from)?),
            None => Err(DomainError::Database(DbError::NotFound(
                "upload_queue".into(),
                id.to_string(),
            ))),
        }
    }

    async fn reset_for_retry(&self, id: Uuid, expected_retry_count: i32) -> DomainResult<bool> {
        let now_str = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE upload_queue
             SET status = 'pending', updated_at = ?
             WHERE id = ? AND status = 'error' AND retry_count = ?",
        )
        .bind(&now_str)
        .bind(id.to_string())
        .bind(expected_retry_count)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn retry_item(&self, id: Uuid) -> DomainResult<bool> {
        let now_str = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE upload_queue
             SET status = 'pending', updated_at = ?
             WHERE id = ? AND status = 'error'",
        )
        .bind(&now_str)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_completed(&self) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM upload_queue WHERE status = 'completed'")
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(result.rows_affected())
    }

    async fn queue_status(&self) -> DomainResult<QueueStatus> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'uploading' THEN 1 ELSE 0 END), 0) AS uploading,
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) AS error,
                COUNT(*) AS total
             FROM upload_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(QueueStatus {
            pending: row.try_get("pending").map_err(DbError::from)?,
            uploading: row.try_get("uploading").map_err(DbError::from)?,
            completed: row.try_get("completed").map_err(DbError::from)?,
            error: row.try_get("error").map_err(DbError::from)?,
            total: row.try_get("total").map_err(DbError::from)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_migration;
    use crate::domains::queue::types::UploadPriority;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> Pool<Sqlite> {
        // Single connection so the in-memory database is shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db_migration::run_migrations(&pool).await.unwrap();
        pool
    }

    fn new_item(field: &str) -> NewUploadItem {
        NewUploadItem {
            payload: vec![1, 2, 3, 4],
            target_record_id: Uuid::new_v4(),
            target_field: field.to_string(),
            file_name: "photo.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            priority: UploadPriority::Normal,
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let item = repo.enqueue(new_item("photo1")).await.unwrap();
        assert_eq!(item.status, UploadStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.payload, vec![1, 2, 3, 4]);

        let fetched = repo.get_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(fetched.target_field, "photo1");

        let pending = repo
            .get_all_by_status(UploadStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(repo
            .get_all_by_status(UploadStatus::Completed)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let item = repo.enqueue(new_item("photo1")).await.unwrap();

        let first = repo.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(first.id, item.id);
        assert_eq!(first.status, UploadStatus::Uploading);

        // Nothing pending is left, so a racing cycle gets no claim
        assert!(repo.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_order_is_oldest_first() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let first = repo.enqueue(new_item("first")).await.unwrap();
        // created_at has second resolution in RFC 3339 strings; force distinct
        // timestamps so ordering is unambiguous.
        sqlx::query("UPDATE upload_queue SET created_at = '2026-01-01T00:00:00+00:00' WHERE id = ?")
            .bind(first.id.to_string())
            .execute(&repo.pool)
            .await
            .unwrap();
        repo.enqueue(new_item("second")).await.unwrap();

        let claimed = repo.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn test_reclaim_requeues_interrupted_uploads() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let stuck = repo.enqueue(new_item("photo1")).await.unwrap();
        repo.claim_next_pending().await.unwrap().unwrap();
        repo.enqueue(new_item("photo2")).await.unwrap();

        assert_eq!(repo.reclaim_interrupted().await.unwrap(), 1);

        let stored = repo.get_by_id(stuck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Pending);
        assert_eq!(stored.retry_count, 0);

        let status = repo.queue_status().await.unwrap();
        assert_eq!(status.pending, 2);
        assert_eq!(status.uploading, 0);

        assert_eq!(repo.reclaim_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_error_increments_retry_count() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let item = repo.enqueue(new_item("photo1")).await.unwrap();
        repo.claim_next_pending().await.unwrap().unwrap();

        let retries = repo.mark_error(item.id, "connection refused").await.unwrap();
        assert_eq!(retries, 1);

        let stored = repo.get_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_reset_for_retry_is_conditional() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let item = repo.enqueue(new_item("photo1")).await.unwrap();
        repo.claim_next_pending().await.unwrap().unwrap();
        repo.mark_error(item.id, "boom").await.unwrap();

        // Wrong expected retry count: stale backoff timers must not reset
        assert!(!repo.reset_for_retry(item.id, 2).await.unwrap());
        assert!(repo.reset_for_retry(item.id, 1).await.unwrap());

        let stored = repo.get_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Pending);
        assert_eq!(stored.retry_count, 1);

        // Second delivery of the same reset is a no-op
        assert!(!repo.reset_for_retry(item.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_manual_retry_only_applies_to_error_items() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let item = repo.enqueue(new_item("photo1")).await.unwrap();
        assert!(!repo.retry_item(item.id).await.unwrap());

        repo.claim_next_pending().await.unwrap().unwrap();
        repo.mark_error(item.id, "boom").await.unwrap();
        assert!(repo.retry_item(item.id).await.unwrap());

        let stored = repo.get_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_completion_and_clear() {
        let repo = SqliteUploadQueueRepository::new(test_pool().await);

        let item = repo.enqueue(new_item("photo1")).await.unwrap();
        repo.enqueue(new_item("photo2")).await.unwrap();

        repo.claim_next_pending().await.unwrap().unwrap();
        repo.mark_completed(item.id).await.unwrap();

        let stored = repo.get_by_id(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Completed);
        assert!(stored.completed_at.is_some());

        // Duplicate completion delivery does not corrupt state
        repo.mark_completed(item.id).await.unwrap();

        let status = repo.queue_status().await.unwrap();
        assert_eq!(status.pending, 1);
        assert_eq!(status.completed, 1);
        assert_eq!(status.total, 2);

        assert_eq!(repo.clear_completed().await.unwrap(), 1);
        let status = repo.queue_status().await.unwrap();
        assert_eq!(status.completed, 0);
        assert_eq!(status.total, 1);
    }
}
