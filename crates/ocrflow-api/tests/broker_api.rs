use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use ocrflow_api::{ApiServer, AppState, ServerConfig};
use ocrflow_persist::MemoryDocumentStore;
use ocrflow_queue::{
    FailOutcome, MemoryQueueStore, QueueConfig, QueueManager, TopicDefinition, TopicDefinitions,
};
use ocrflow_runtime::{Broker, DocumentService, HttpBroker, LocalBroker};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt; // for `oneshot`

fn setup(definitions: TopicDefinitions) -> (Arc<QueueManager>, ApiServer) {
    let queue = Arc::new(QueueManager::new(
        Arc::new(MemoryQueueStore::new()),
        QueueConfig::default(),
        definitions,
    ));
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new(queue.clone()));
    let documents = Arc::new(DocumentService::new(
        Arc::new(MemoryDocumentStore::new()),
        broker,
        "document_events",
    ));
    let server = ApiServer::new(ServerConfig::default(), AppState::new(queue.clone(), documents));
    (queue, server)
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let (_queue, server) = setup(TopicDefinitions::default());
    let (status, body) = call(&server.router(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_enqueue_claim_ack_lifecycle() {
    let (_queue, server) = setup(TopicDefinitions::default());
    let router = server.router();
    let job = json!({"document_id": "d1", "owner_id": "u1", "nested": {"n": [1, 2, 3]}});

    let (status, enqueued) = call(&router, "POST", "/enqueue/image_preprocess", Some(job.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(enqueued["topic"], "image_preprocess");
    let id = enqueued["id"].as_str().unwrap().to_string();

    // The /api prefix serves the same queue
    let (status, claimed) = call(&router, "POST", "/api/claim/image_preprocess", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["id"], id.as_str());
    assert_eq!(claimed["payload"], job);
    assert_eq!(claimed["attempts"], 1);

    let (status, body) = call(&router, "POST", &format!("/ack/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");

    let (status, _) = call(&router, "POST", &format!("/ack/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&router, "POST", "/claim/image_preprocess", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "no messages");
}

#[tokio::test]
async fn test_fail_requeues_then_dead_letters() {
    let defs = TopicDefinitions::new([TopicDefinition {
        name: "ocr_extract".into(),
        max_retries: 2,
        retry_delay_seconds: 0,
    }]);
    let (queue, server) = setup(defs);
    let router = server.router();

    let (_, enqueued) = call(&router, "POST", "/enqueue/ocr_extract", Some(json!({"document_id": "d1"}))).await;
    let id = enqueued["id"].as_str().unwrap().to_string();

    call(&router, "POST", "/claim/ocr_extract", None).await;
    let (status, body) = call(&router, "POST", &format!("/fail/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "requeued"}));

    let (_, claimed) = call(&router, "POST", "/claim/ocr_extract", None).await;
    assert_eq!(claimed["attempts"], 2);
    let (_, body) = call(&router, "POST", &format!("/fail/{}", id), None).await;
    assert_eq!(body["status"], "dead_lettered");
    assert_eq!(body["topic"], "ocr_extract.dead_letter");

    assert_eq!(queue.depth("ocr_extract").await.unwrap().pending, 0);
    assert_eq!(queue.depth("ocr_extract.dead_letter").await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_unknown_and_invalid_ids_are_not_found() {
    let (_queue, server) = setup(TopicDefinitions::default());
    let router = server.router();

    for uri in [
        format!("/fail/{}", uuid::Uuid::new_v4()),
        format!("/api/ack/{}", uuid::Uuid::new_v4()),
        "/fail/not-a-uuid".to_string(),
        "/ack/42".to_string(),
    ] {
        let (status, body) = call(&router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn test_enqueue_requires_json_object() {
    let (_queue, server) = setup(TopicDefinitions::default());
    let (status, body) = call(&server.router(), "POST", "/enqueue/t", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_http_broker_against_running_server() {
    let (_queue, server) = setup(TopicDefinitions::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    let handle = {
        let token = token.clone();
        tokio::spawn(async move { server.serve(listener, token).await })
    };

    let broker = HttpBroker::new(&format!("http://{}", addr)).unwrap();
    assert!(broker.claim("ocr_extract").await.unwrap().is_none());

    let payload = json!({"document_id": "d1", "owner_id": "u1"});
    let id = broker.enqueue("ocr_extract", &payload).await.unwrap();

    let item = broker.claim("ocr_extract").await.unwrap().unwrap();
    assert_eq!(item.id, id);
    assert_eq!(item.attempts, 1);
    assert_eq!(serde_json::from_slice::<Value>(&item.payload).unwrap(), payload);

    assert_eq!(broker.fail(id).await.unwrap(), Some(FailOutcome::Requeued));
    assert!(broker.ack(id).await.unwrap());
    assert!(!broker.ack(id).await.unwrap());
    assert_eq!(broker.fail(id).await.unwrap(), None);

    // Topic names with path characters stay one route segment
    let id = broker.enqueue("scans/2024?x#y", &payload).await.unwrap();
    assert!(broker.claim("scans").await.unwrap().is_none());
    let item = broker.claim("scans/2024?x#y").await.unwrap().unwrap();
    assert_eq!(item.id, id);
    assert_eq!(item.topic, "scans/2024?x#y");

    token.cancel();
    handle.await.unwrap().unwrap();
}
