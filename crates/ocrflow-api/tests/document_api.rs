use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use ocrflow_api::{api_router, AppState};
use ocrflow_core::{DocumentEvent, EventType};
use ocrflow_persist::MemoryDocumentStore;
use ocrflow_queue::{MemoryQueueStore, QueueConfig, QueueManager, TopicDefinitions};
use ocrflow_runtime::{Broker, DocumentService, LocalBroker, NOT_FOUND_OR_DENIED, NOT_PREPROCESSED};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const UPLOAD_LIMIT: usize = 64;

struct TestApp {
    router: Router,
    queue: Arc<QueueManager>,
}

fn setup() -> TestApp {
    let queue = Arc::new(QueueManager::new(
        Arc::new(MemoryQueueStore::new()),
        QueueConfig::default(),
        TopicDefinitions::default(),
    ));
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(queue.clone()));
    let documents = Arc::new(
        DocumentService::new(Arc::new(MemoryDocumentStore::new()), broker, "document_events")
            .with_max_upload_bytes(UPLOAD_LIMIT),
    );
    TestApp {
        router: api_router(AppState::new(queue.clone(), documents)),
        queue,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn get(uri: &str, owner: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", owner)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, owner: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-user-id", owner)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn upload_request(owner: &str, filename: &str, content: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/documents")
        .header("x-user-id", owner)
        .header("x-filename", filename)
        .header("content-type", "image/png")
        .body(Body::from(content))
        .unwrap()
}

async fn upload(app: &TestApp, owner: &str, filename: &str) -> String {
    let (status, body) = send(&app.router, upload_request(owner, filename, b"png-bytes".to_vec())).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_missing_owner_header_is_unauthorized() {
    let app = setup();
    let request = Request::builder().uri("/api/documents").body(Body::empty()).unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_upload_get_and_list() {
    let app = setup();
    let (status, doc) = send(&app.router, upload_request("u1", "scan.png", b"png-bytes".to_vec())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(doc["status"], "uploaded");
    assert_eq!(doc["filename"], "scan.png");
    assert_eq!(doc["content_type"], "image/png");
    assert_eq!(doc["size_bytes"], 9);
    let id = doc["id"].as_str().unwrap();

    let (status, fetched) = send(&app.router, get(&format!("/api/documents/{}", id), "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id);

    let (status, _) = send(&app.router, get(&format!("/api/documents/{}", id), "u2")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app.router, get("/api/documents/not-a-uuid", "u1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = send(&app.router, get("/api/documents", "u1")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let (_, listed) = send(&app.router, get("/api/documents", "u2")).await;
    assert!(listed.as_array().unwrap().is_empty());

    // Upload alone does not start processing
    assert_eq!(app.queue.depth("document_events").await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_upload_size_checks() {
    let app = setup();
    let (status, _) = send(&app.router, upload_request("u1", "empty.png", Vec::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, upload_request("u1", "big.png", vec![0u8; UPLOAD_LIMIT + 1])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_process_requeues_and_emits_uploaded_event() {
    let app = setup();
    let id = upload(&app, "u1", "a.png").await;

    let (status, doc) = send(
        &app.router,
        post_json(&format!("/api/documents/{}/process", id), "u1", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["status"], "queued_preprocessing");

    let item = app.queue.claim("document_events").await.unwrap().unwrap();
    let event = DocumentEvent::decode(&item.payload).unwrap();
    assert_eq!(event.event_type, EventType::DocumentUploaded);
    assert_eq!(event.document_id.to_string(), id);
    assert_eq!(event.payload.unwrap()["reason"], "manual_requeue");

    let (status, _) = send(
        &app.router,
        post_json(&format!("/api/documents/{}/process", id), "u2", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_reports_partial_success() {
    let app = setup();
    let mine = upload(&app, "u1", "mine.png").await;
    let theirs = upload(&app, "u2", "theirs.png").await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/documents/process-batch",
            "u1",
            json!({"document_ids": [mine, theirs]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["message"], "Batch processing started");
    assert_eq!(body["processed_ids"], json!([mine]));
    assert_eq!(body["errors"][&theirs], NOT_FOUND_OR_DENIED);

    let (_, doc) = send(&app.router, get(&format!("/api/documents/{}", mine), "u1")).await;
    assert_eq!(doc["status"], "queued_preprocessing");
    let (_, doc) = send(&app.router, get(&format!("/api/documents/{}", theirs), "u2")).await;
    assert_eq!(doc["status"], "uploaded");

    assert_eq!(app.queue.depth("document_events").await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_batch_with_nothing_queued_is_rejected() {
    let app = setup();
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/documents/process-batch",
            "u1",
            json!({"document_ids": ["missing"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No documents could be queued.");
    assert_eq!(body["error"]["details"]["errors"]["missing"], NOT_FOUND_OR_DENIED);
}

#[tokio::test]
async fn test_batch_ocr_requires_preprocessing() {
    let app = setup();
    let id = upload(&app, "u1", "raw.png").await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/documents/process-batch-ocr",
            "u1",
            json!({"document_ids": [id]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No documents could be queued for OCR.");
    assert_eq!(body["error"]["details"]["errors"][&id], NOT_PREPROCESSED);
}
