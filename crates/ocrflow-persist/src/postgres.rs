//! PostgreSQL queue store
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so concurrent workers on one topic
//! each lock a different row instead of queuing behind each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ocrflow_queue::{ItemId, ItemStatus, QueueDepth, QueueError, QueueItem, QueueStore};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tracing::info;

use crate::backend::StorageError;

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    /// `DATABASE_URL` when it names a PostgreSQL database
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return None;
        }
        Some(Self {
            url,
            max_connections: 10,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn new_with_config(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");

        sqlx::migrate!("./migrations/postgres")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Internal(format!("Migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn queue_store(&self) -> Arc<PgQueueStore> {
        Arc::new(PgQueueStore::new(self.pool.clone()))
    }
}

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend_err(e: impl std::fmt::Display) -> QueueError {
    QueueError::Backend(e.to_string())
}

fn row_to_item(row: &PgRow) -> Result<QueueItem, QueueError> {
    let status: String = row.try_get("status").map_err(backend_err)?;
    let attempts: i32 = row.try_get("attempts").map_err(backend_err)?;

    Ok(QueueItem {
        id: row.try_get("id").map_err(backend_err)?,
        topic: row.try_get("topic").map_err(backend_err)?,
        payload: row.try_get("payload").map_err(backend_err)?,
        status: status.parse::<ItemStatus>().map_err(QueueError::Backend)?,
        attempts: u32::try_from(attempts).map_err(backend_err)?,
        available_at: row.try_get("available_at").map_err(backend_err)?,
        claimed_until: row.try_get("claimed_until").map_err(backend_err)?,
        created_at: row.try_get("created_at").map_err(backend_err)?,
        updated_at: row.try_get("updated_at").map_err(backend_err)?,
    })
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn insert(&self, item: &QueueItem) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO queue_items (id, topic, payload, document_ref, status, attempts, available_at, claimed_until, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(item.id)
        .bind(&item.topic)
        .bind(&item.payload)
        .bind(item.document_ref())
        .bind(item.status.as_str())
        .bind(item.attempts as i32)
        .bind(item.available_at)
        .bind(item.claimed_until)
        .bind(item.created_at)
        .bind(item.updated_at)
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
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let row = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'processing',
                claimed_until = $1,
                attempts = attempts + 1,
                updated_at = $2
            WHERE id = (
                SELECT id FROM queue_items
                WHERE topic = $3 AND status = 'pending' AND available_at <= $2
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING id, topic, payload, status, attempts, available_at, claimed_until, created_at, updated_at
            "#,
        )
        .bind(lease_until)
        .bind(now)
        .bind(topic)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>, QueueError> {
        let row = sqlx::query(
            "SELECT id, topic, payload, status, attempts, available_at, claimed_until, created_at, updated_at \
             FROM queue_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn delete(&self, id: ItemId) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = $1")
            .bind(id)
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
            "UPDATE queue_items SET status = 'pending', claimed_until = NULL, topic = $1, available_at = $2, updated_at = $3 \
             WHERE id = $4",
        )
        .bind(topic)
        .bind(available_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE queue_items SET status = 'pending', claimed_until = NULL, available_at = $1, updated_at = $1 \
             WHERE status = 'processing' AND claimed_until < $1",
        )
        .bind(now)
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
        let row = sqlx::query(
            "SELECT 1 FROM queue_items WHERE topic = ANY($1) AND document_ref = $2 LIMIT 1",
        )
        .bind(topics)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(row.is_some())
    }

    async fn depth(&self, topic: &str) -> Result<QueueDepth, QueueError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM queue_items WHERE topic = $1 GROUP BY status",
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
