use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ocrflow_queue::{ItemId, ItemStatus, QueueDepth, QueueError, QueueItem, QueueStore};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::sqlite::{from_millis, to_millis};

const ITEM_COLUMNS: &str =
    "id, topic, payload, status, attempts, available_at, claimed_until, created_at, updated_at";

/// Durable queue store using SQLite
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backend_err(e: impl std::fmt::Display) -> QueueError {
    QueueError::Backend(e.to_string())
}

fn row_to_item(row: &SqliteRow) -> Result<QueueItem, QueueError> {
    let id: String = row.try_get("id").map_err(backend_err)?;
    let status: String = row.try_get("status").map_err(backend_err)?;
    let attempts: i64 = row.try_get("attempts").map_err(backend_err)?;
    let claimed_until: Option<i64> = row.try_get("claimed_until").map_err(backend_err)?;

    Ok(QueueItem {
        id: Uuid::parse_str(&id).map_err(|_| QueueError::Backend("Invalid UUID".into()))?,
        topic: row.try_get("topic").map_err(backend_err)?,
        payload: row.try_get("payload").map_err(backend_err)?,
        status: status.parse::<ItemStatus>().map_err(QueueError::Backend)?,
        attempts: u32::try_from(attempts).map_err(backend_err)?,
        available_at: from_millis(row.try_get("available_at").map_err(backend_err)?)
            .map_err(backend_err)?,
        claimed_until: claimed_until
            .map(from_millis)
            .transpose()
            .map_err(backend_err)?,
        created_at: from_millis(row.try_get("created_at").map_err(backend_err)?)
            .map_err(backend_err)?,
        updated_at: from_millis(row.try_get("updated_at").map_err(backend_err)?)
            .map_err(backend_err)?,
    })
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, item: &QueueItem) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO queue_items (id, topic, payload, status, attempts, available_at, claimed_until, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id.to_string())
        .bind(&item.topic)
        .bind(&item.payload)
        .bind(item.status.as_str())
        .bind(item.attempts as i64)
        .bind(to_millis(item.available_at))
        .bind(item.claimed_until.map(to_millis))
        .bind(to_millis(item.created_at))
        .bind(to_millis(item.updated_at))
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }

    async fn claim_next(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueError> {
        let now_ms = to_millis(now);

        // A write statement takes the database write lock before its subquery
        // runs, so selection and update cannot interleave with another claim.
        let sql = format!(
            r#"
            UPDATE queue_items
            SET status = 'processing',
                claimed_until = ?,
                attempts = attempts + 1,
                updated_at = ?
            WHERE id = (
                SELECT id FROM queue_items
                WHERE topic = ? AND status = 'pending' AND available_at <= ?
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(to_millis(lease_until))
            .bind(now_ms)
            .bind(topic)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>, QueueError> {
        let sql = format!("SELECT {} FROM queue_items WHERE id = ?", ITEM_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn delete(&self, id: ItemId) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: ItemId,
        topic: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', claimed_until = NULL, topic = ?, available_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(topic)
        .bind(to_millis(available_at))
        .bind(to_millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let now_ms = to_millis(now);
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', claimed_until = NULL, available_at = ?, updated_at = ?
            WHERE status = 'processing' AND claimed_until < ?
            "#,
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(result.rows_affected())
    }

    async fn references_document(
        &self,
        topics: &[String],
        document_id: &str,
    ) -> Result<bool, QueueError> {
        if topics.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; topics.len()].join(", ");
        let sql = format!(
            r#"
            SELECT 1 FROM queue_items
            WHERE topic IN ({})
              AND CASE WHEN json_valid(CAST(payload AS TEXT))
                       THEN json_extract(CAST(payload AS TEXT), '$.document_id')
                  END = ?
            LIMIT 1
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for topic in topics {
            query = query.bind(topic);
        }
        let row = query
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(row.is_some())
    }

    async fn depth(&self, topic: &str) -> Result<QueueDepth, QueueError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM queue_items WHERE topic = ? GROUP BY status",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        let mut depth = QueueDepth::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(backend_err)?;
            let n: i64 = row.try_get("n").map_err(backend_err)?;
            match status.parse::<ItemStatus>().map_err(QueueError::Backend)? {
                ItemStatus::Pending => depth.pending = n as u64,
                ItemStatus::Processing => depth.processing = n as u64,
            }
        }
        Ok(depth)
    }
}
