//! Broker routes and router assembly

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use ocrflow_queue::{FailOutcome, ItemId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::documents::document_routes;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub id: ItemId,
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub id: ItemId,
    pub topic: String,
    pub payload: Value,
    pub attempts: u32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Stored payloads are JSON written by `enqueue`; anything else is returned as text.
fn payload_value(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Unparseable ids cannot name an item, so they share the unknown-id response
fn parse_item_id(raw: &str) -> ApiResult<ItemId> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("item {} not found", raw)))
}

pub async fn enqueue(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<EnqueueResponse>> {
    if !body.is_object() {
        return Err(ApiError::BadRequest("payload must be a JSON object".to_string()));
    }
    let bytes = serde_json::to_vec(&body).map_err(|e| ApiError::Internal(e.to_string()))?;
    let id = state.queue().enqueue(&topic, bytes).await?;
    debug!(item_id = %id, topic = %topic, "Enqueued via API");
    Ok(Json(EnqueueResponse { id, topic }))
}

pub async fn claim(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> ApiResult<Json<ClaimResponse>> {
    let item = state
        .queue()
        .claim(&topic)
        .await?
        .ok_or_else(|| ApiError::NotFound("no messages".to_string()))?;

    Ok(Json(ClaimResponse {
        id: item.id,
        payload: payload_value(&item.payload),
        topic: item.topic,
        attempts: item.attempts,
    }))
}

pub async fn ack(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let id = parse_item_id(&id)?;
    if !state.queue().ack(id).await? {
        return Err(ApiError::NotFound(format!("item {} not found", id)));
    }
    Ok(Json(StatusResponse {
        status: "acknowledged".to_string(),
        topic: None,
    }))
}

pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let id = parse_item_id(&id)?;
    let outcome = state
        .queue()
        .fail_with_policy(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("item {} not found", id)))?;

    let topic = match &outcome {
        FailOutcome::DeadLettered { topic } => {
            info!(item_id = %id, dead_letter_topic = %topic, "Item dead-lettered via API");
            Some(topic.clone())
        }
        FailOutcome::Requeued => None,
    };
    Ok(Json(StatusResponse {
        status: outcome.as_str().to_string(),
        topic,
    }))
}

fn broker_routes() -> Router<AppState> {
    Router::new()
        .route("/enqueue/{topic}", post(enqueue))
        .route("/claim/{topic}", post(claim))
        .route("/ack/{id}", post(ack))
        .route("/fail/{id}", post(fail))
}

/// Fallback for unmatched paths, in the error body shape
async fn not_found() -> ApiError {
    ApiError::NotFound("route not found".to_string())
}

/// Broker routes at the root and under `/api`, document routes under `/api`
pub fn api_router(state: AppState) -> Router {
    let upload_limit = state.documents().max_upload_bytes();

    Router::new()
        .route("/health", get(health))
        .merge(broker_routes())
        .nest(
            "/api",
            broker_routes().merge(document_routes(upload_limit)),
        )
        .fallback(not_found)
        .with_state(state)
}
