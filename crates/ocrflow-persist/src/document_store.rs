//! SQLite document records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ocrflow_core::{ArtifactVariant, Document, DocumentId, DocumentStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{DocumentStore, StatusChange, StorageError};
use crate::sqlite::{from_millis, to_millis};

const DOCUMENT_COLUMNS: &str =
    "id, owner_id, filename, content_type, size_bytes, status, ocr_text, error_message, created_at, updated_at";

/// Compare-and-swap attempts before a contended transition gives up
const TRANSITION_ATTEMPTS: usize = 5;

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_with_revision(&self, id: DocumentId) -> Result<Option<(Document, i64)>, StorageError> {
        let sql = format!("SELECT {}, revision FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let revision: i64 = row.try_get("revision").map_err(query_err)?;
                Ok(Some((row_to_document(&row)?, revision)))
            }
            None => Ok(None),
        }
    }
}

fn query_err(e: sqlx::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

fn row_to_document(row: &SqliteRow) -> Result<Document, StorageError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;

    Ok(Document {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::Serialization(e.to_string()))?,
        owner_id: row.try_get("owner_id").map_err(query_err)?,
        filename: row.try_get("filename").map_err(query_err)?,
        content_type: row.try_get("content_type").map_err(query_err)?,
        size_bytes: row.try_get("size_bytes").map_err(query_err)?,
        status: status
            .parse::<DocumentStatus>()
            .map_err(StorageError::Serialization)?,
        ocr_text: row.try_get("ocr_text").map_err(query_err)?,
        error_message: row.try_get("error_message").map_err(query_err)?,
        created_at: from_millis(row.try_get("created_at").map_err(query_err)?)?,
        updated_at: from_millis(row.try_get("updated_at").map_err(query_err)?)?,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, document: &Document) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO documents (id, owner_id, filename, content_type, size_bytes, status, ocr_text, error_message, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(document.id.to_string())
        .bind(&document.owner_id)
        .bind(&document.filename)
        .bind(&document.content_type)
        .bind(document.size_bytes)
        .bind(document.status.as_str())
        .bind(&document.ocr_text)
        .bind(&document.error_message)
        .bind(to_millis(document.created_at))
        .bind(to_millis(document.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::AlreadyExists(document.id.to_string())
            }
            other => query_err(other),
        })?;

        Ok(())
    }

    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StorageError> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Document>, StorageError> {
        let sql = format!(
            "SELECT {} FROM documents WHERE owner_id = ? ORDER BY created_at DESC",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        rows.iter().map(row_to_document).collect()
    }

    async fn transition(&self, id: DocumentId, change: StatusChange) -> Result<Document, StorageError> {
        for _ in 0..TRANSITION_ATTEMPTS {
            let (current, revision) = self
                .get_with_revision(id)
                .await?
                .ok_or_else(|| StorageError::document_not_found(id))?;
            let next = change.apply_to(&current, Utc::now())?;

            // Only applies if no other write landed since it was read.
            let result = sqlx::query(
                r#"
                UPDATE documents
                SET status = ?, error_message = ?, ocr_text = ?, updated_at = ?, revision = revision + 1
                WHERE id = ? AND revision = ?
                "#,
            )
            .bind(next.status.as_str())
            .bind(&next.error_message)
            .bind(&next.ocr_text)
            .bind(to_millis(next.updated_at))
            .bind(id.to_string())
            .bind(revision)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;

            if result.rows_affected() == 1 {
                return Ok(next);
            }
            debug!(document_id = %id, revision, "Concurrent document update, retrying transition");
        }

        Err(StorageError::Internal(format!(
            "document {} kept changing during transition to {}",
            id, change.status
        )))
    }

    async fn touch(&self, id: DocumentId) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE documents SET updated_at = ?, revision = revision + 1 WHERE id = ?")
            .bind(to_millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale(
        &self,
        statuses: &[DocumentStatus],
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Document>, StorageError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM documents WHERE status IN ({}) AND updated_at < ? ORDER BY updated_at ASC",
            DOCUMENT_COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(to_millis(updated_before))
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        rows.iter().map(row_to_document).collect()
    }

    async fn put_artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
        content: &[u8],
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO document_artifacts (document_id, variant, content, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (document_id, variant) DO UPDATE SET content = excluded.content, created_at = excluded.created_at
            "#,
        )
        .bind(id.to_string())
        .bind(variant.as_str())
        .bind(content)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StorageError::document_not_found(id)
            }
            other => query_err(other),
        })?;

        Ok(())
    }

    async fn get_artifact(
        &self,
        id: DocumentId,
        variant: ArtifactVariant,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let row = sqlx::query(
            "SELECT content FROM document_artifacts WHERE document_id = ? AND variant = ?",
        )
        .bind(id.to_string())
        .bind(variant.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => Ok(Some(row.try_get("content").map_err(query_err)?)),
            None => Ok(None),
        }
    }
}
