//! Document routes
//!
//! The owner comes from the `x-user-id` header set by the upstream gateway.
//! Documents that do not exist and documents owned by someone else are
//! indistinguishable to the caller.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use ocrflow_core::{Document, DocumentId};
use ocrflow_runtime::BatchSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const OWNER_HEADER: &str = "x-user-id";
pub const FILENAME_HEADER: &str = "x-filename";

/// Authenticated document owner
#[derive(Debug, Clone)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", OWNER_HEADER)))
    }
}

fn document_not_found() -> ApiError {
    ApiError::NotFound("document not found".to_string())
}

fn parse_document_id(raw: &str) -> ApiResult<DocumentId> {
    raw.parse().map_err(|_| document_not_found())
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub async fn upload_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let filename = header_str(&headers, FILENAME_HEADER).unwrap_or("upload");
    let content_type =
        header_str(&headers, header::CONTENT_TYPE).unwrap_or("application/octet-stream");

    let document = state
        .documents()
        .register_upload(&owner, filename, content_type, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(state.documents().list(&owner).await?))
}

pub async fn get_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    let id = parse_document_id(&id)?;
    state
        .documents()
        .get_owned(&owner, id)
        .await?
        .map(Json)
        .ok_or_else(document_not_found)
}

pub async fn process_document(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    let id = parse_document_id(&id)?;
    let document = state.documents().requeue(&owner, id).await?;
    info!(document_id = %id, owner_id = %owner, "Document requeued");
    Ok(Json(document))
}

#[derive(Debug, Deserialize)]
pub struct ProcessDocumentsRequest {
    pub document_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub message: String,
    pub processed_ids: Vec<DocumentId>,
    pub errors: BTreeMap<String, String>,
}

/// 202 when anything was queued, 400 with the per-id errors otherwise
fn batch_response(
    summary: BatchSummary,
    accepted: &str,
    rejected: &str,
) -> ApiResult<(StatusCode, Json<BatchResponse>)> {
    if summary.is_empty() && !summary.errors.is_empty() {
        return Err(ApiError::Rejected {
            message: rejected.to_string(),
            details: serde_json::json!({ "errors": summary.errors }),
        });
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            message: accepted.to_string(),
            processed_ids: summary.processed_ids,
            errors: summary.errors,
        }),
    ))
}

pub async fn process_batch(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<ProcessDocumentsRequest>,
) -> ApiResult<(StatusCode, Json<BatchResponse>)> {
    let summary = state
        .documents()
        .requeue_batch(&owner, &request.document_ids)
        .await;
    info!(
        owner_id = %owner,
        queued = summary.processed_ids.len(),
        rejected = summary.errors.len(),
        "Batch processing request"
    );
    batch_response(summary, "Batch processing started", "No documents could be queued.")
}

pub async fn process_batch_ocr(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<ProcessDocumentsRequest>,
) -> ApiResult<(StatusCode, Json<BatchResponse>)> {
    let summary = state
        .documents()
        .requeue_batch_ocr(&owner, &request.document_ids)
        .await;
    info!(
        owner_id = %owner,
        queued = summary.processed_ids.len(),
        rejected = summary.errors.len(),
        "Batch OCR request"
    );
    batch_response(summary, "Batch OCR started", "No documents could be queued for OCR.")
}

pub fn document_routes(upload_limit: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/documents",
            post(upload_document)
                .get(list_documents)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/documents/process-batch", post(process_batch))
        .route("/documents/process-batch-ocr", post(process_batch_ocr))
        .route("/documents/{id}", get(get_document))
        .route("/documents/{id}/process", post(process_document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_batch_response_rejects_when_nothing_queued() {
        let mut summary = BatchSummary::default();
        summary.errors.insert("x".into(), "nope".into());
        assert!(matches!(
            batch_response(summary, "ok", "none"),
            Err(ApiError::Rejected { .. })
        ));
    }

    #[test]
    fn test_batch_response_accepts_partial_success() {
        let mut summary = BatchSummary::default();
        summary.processed_ids.push(Uuid::new_v4());
        summary.errors.insert("x".into(), "nope".into());
        let (status, Json(body)) = batch_response(summary, "ok", "none").unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.processed_ids.len(), 1);
        assert_eq!(body.errors.len(), 1);
    }

    #[test]
    fn test_empty_batch_is_accepted() {
        let (status, _) = batch_response(BatchSummary::default(), "ok", "none").unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
