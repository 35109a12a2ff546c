use chrono::{Duration, Utc};
use ocrflow_persist::{SqliteBackend, SqliteConfig};
use ocrflow_queue::{
    FailOutcome, QueueConfig, QueueItem, QueueManager, QueueStore, TopicDefinition,
    TopicDefinitions,
};
use std::collections::HashSet;
use std::sync::Arc;

async fn memory_store() -> Arc<dyn QueueStore> {
    let backend = SqliteBackend::new_with_config(SqliteConfig::memory())
        .await
        .expect("sqlite memory backend");
    backend.queue_store()
}

#[tokio::test]
async fn test_payload_bytes_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let store = memory_store().await;
    let queue = QueueManager::new(store, QueueConfig::default(), TopicDefinitions::default());

    let payload = vec![0u8, 1, 2, 255, b'"', b'\n'];
    let id = queue.enqueue("raw", payload.clone()).await?;

    let item = queue.claim("raw").await?.expect("item should be claimable");
    assert_eq!(item.id, id);
    assert_eq!(item.topic, "raw");
    assert_eq!(item.payload, payload);
    assert_eq!(item.attempts, 1);
    Ok(())
}

#[tokio::test]
async fn test_claim_is_fifo_and_topic_scoped() -> Result<(), Box<dyn std::error::Error>> {
    let store = memory_store().await;
    let now = Utc::now();
    let first = QueueItem::new("ocr_extract", b"1".to_vec(), now);
    let second = QueueItem::new("ocr_extract", b"2".to_vec(), now);
    let other = QueueItem::new("image_preprocess", b"3".to_vec(), now);
    store.insert(&first).await?;
    store.insert(&second).await?;
    store.insert(&other).await?;

    let lease = now + Duration::seconds(120);
    let a = store.claim_next("ocr_extract", now, lease).await?.unwrap();
    let b = store.claim_next("ocr_extract", now, lease).await?.unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, second.id);
    assert!(store.claim_next("ocr_extract", now, lease).await?.is_none());

    let depth = store.depth("ocr_extract").await?;
    assert_eq!(depth.processing, 2);
    assert_eq!(depth.pending, 0);
    assert_eq!(store.depth("image_preprocess").await?.pending, 1);
    Ok(())
}

#[tokio::test]
async fn test_ack_deletes_permanently() -> Result<(), Box<dyn std::error::Error>> {
    let store = memory_store().await;
    let queue = QueueManager::new(store, QueueConfig::default(), TopicDefinitions::default());

    let id = queue.enqueue("t", b"{}".to_vec()).await?;
    queue.claim("t").await?.unwrap();
    assert!(queue.ack(id).await?);
    assert!(!queue.ack(id).await?);
    assert!(queue.claim("t").await?.is_none());
    assert_eq!(queue.fail(id, 0).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_fail_hides_item_until_delay() -> Result<(), Box<dyn std::error::Error>> {
    let store = memory_store().await;
    let now = Utc::now();
    let item = QueueItem::new("t", b"{}".to_vec(), now);
    store.insert(&item).await?;
    let lease = now + Duration::seconds(120);
    store.claim_next("t", now, lease).await?.unwrap();

    let retry_at = now + Duration::seconds(30);
    assert!(store.reschedule(item.id, "t", retry_at, now).await?);

    let stored = store.get(item.id).await?.unwrap();
    assert!(stored.claimed_until.is_none());
    assert_eq!(stored.attempts, 1);

    assert!(store
        .claim_next("t", now + Duration::seconds(29), lease)
        .await?
        .is_none());
    let again = store
        .claim_next("t", retry_at, retry_at + Duration::seconds(120))
        .await?
        .unwrap();
    assert_eq!(again.id, item.id);
    assert_eq!(again.attempts, 2);
    Ok(())
}

#[tokio::test]
async fn test_dead_letter_moves_topic() -> Result<(), Box<dyn std::error::Error>> {
    let store = memory_store().await;
    let defs = TopicDefinitions::new([TopicDefinition {
        name: "image_preprocess".into(),
        max_retries: 1,
        retry_delay_seconds: 0,
    }]);
    let queue = QueueManager::new(store.clone(), QueueConfig::default(), defs);

    let id = queue.enqueue("image_preprocess", b"{}".to_vec()).await?;
    queue.claim("image_preprocess").await?.unwrap();
    let outcome = queue.fail_with_policy(id).await?;
    assert!(matches!(outcome, Some(FailOutcome::DeadLettered { .. })));

    let stored = store.get(id).await?.unwrap();
    assert_eq!(stored.topic, "image_preprocess.dead_letter");
    assert!(queue.claim("image_preprocess").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_reap_expired_and_document_refs() -> Result<(), Box<dyn std::error::Error>> {
    let store = memory_store().await;
    let now = Utc::now();
    let item = QueueItem::new(
        "ocr_extract",
        br#"{"document_id":"doc-1","owner_id":"u1"}"#.to_vec(),
        now,
    );
    store.insert(&item).await?;
    store
        .insert(&QueueItem::new("ocr_extract", vec![0xff, 0xfe], now))
        .await?;

    let topics = vec!["document_events".to_string(), "ocr_extract".to_string()];
    assert!(store.references_document(&topics, "doc-1").await?);
    assert!(!store.references_document(&topics, "doc-2").await?);
    assert!(!store.references_document(&[], "doc-1").await?);

    store
        .claim_next("ocr_extract", now, now + Duration::seconds(5))
        .await?
        .unwrap();
    assert_eq!(store.reap_expired(now + Duration::seconds(1)).await?, 0);
    assert_eq!(store.reap_expired(now + Duration::seconds(6)).await?, 1);
    assert_eq!(store.depth("ocr_extract").await?.processing, 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_claims_never_share_an_item() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let backend = SqliteBackend::new_with_config(SqliteConfig::file(dir.path().join("queue.db"))).await?;
    let queue = Arc::new(QueueManager::new(
        backend.queue_store(),
        QueueConfig::default(),
        TopicDefinitions::default(),
    ));

    for i in 0..40 {
        queue.enqueue("image_preprocess", format!("{{\"n\":{}}}", i).into_bytes()).await?;
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = queue.claim("image_preprocess").await.expect("claim") {
                claimed.push(item.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for result in futures::future::join_all(handles).await {
        for id in result? {
            assert!(seen.insert(id), "item {} claimed twice", id);
        }
    }
    assert_eq!(seen.len(), 40);
    Ok(())
}
