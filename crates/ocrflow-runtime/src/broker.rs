//! Broker clients
//!
//! Every pipeline process talks to the queue through [`Broker`]. In a single
//! binary that is a [`LocalBroker`] over the shared [`QueueManager`]; remote
//! workers use [`HttpBroker`] against the broker routes.

use async_trait::async_trait;
use ocrflow_queue::{FailOutcome, ItemId, QueueManager};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::BrokerError;

/// An item leased from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedItem {
    pub id: ItemId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub attempts: u32,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a JSON payload on `topic`
    async fn enqueue(&self, topic: &str, payload: &serde_json::Value) -> Result<ItemId, BrokerError>;

    /// Lease the next item. `None` means the topic is empty.
    async fn claim(&self, topic: &str) -> Result<Option<ClaimedItem>, BrokerError>;

    /// False when the item was unknown
    async fn ack(&self, id: ItemId) -> Result<bool, BrokerError>;

    /// Retry with the item topic's policy. `None` when the item was unknown.
    async fn fail(&self, id: ItemId) -> Result<Option<FailOutcome>, BrokerError>;
}

/// In-process broker over a shared queue manager
#[derive(Clone)]
pub struct LocalBroker {
    queue: Arc<QueueManager>,
}

impl LocalBroker {
    pub fn new(queue: Arc<QueueManager>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn enqueue(&self, topic: &str, payload: &serde_json::Value) -> Result<ItemId, BrokerError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| BrokerError::Decode(e.to_string()))?;
        Ok(self.queue.enqueue(topic, bytes).await?)
    }

    async fn claim(&self, topic: &str) -> Result<Option<ClaimedItem>, BrokerError> {
        Ok(self.queue.claim(topic).await?.map(|item| ClaimedItem {
            id: item.id,
            topic: item.topic,
            payload: item.payload,
            attempts: item.attempts,
        }))
    }

    async fn ack(&self, id: ItemId) -> Result<bool, BrokerError> {
        Ok(self.queue.ack(id).await?)
    }

    async fn fail(&self, id: ItemId) -> Result<Option<FailOutcome>, BrokerError> {
        Ok(self.queue.fail_with_policy(id).await?)
    }
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    id: ItemId,
}

#[derive(Debug, Deserialize)]
struct ClaimResponse {
    id: ItemId,
    topic: String,
    payload: serde_json::Value,
    attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    topic: Option<String>,
}

/// Broker client for the HTTP broker routes
#[derive(Debug, Clone)]
pub struct HttpBroker {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBroker {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// `base_url` is the server root, e.g. `http://broker:8003`
    pub fn new(base_url: &str) -> Result<Self, BrokerError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let parsed = Url::parse(base_url).map_err(|e| BrokerError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(BrokerError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// `<base>/api/<action>/<arg>` with `arg` percent-encoded as one segment
    fn url(&self, action: &str, arg: &str) -> Result<Url, BrokerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BrokerError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", action, arg]);
        Ok(url)
    }

    async fn error_for(response: reqwest::Response) -> BrokerError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        BrokerError::Status { status, message }
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn enqueue(&self, topic: &str, payload: &serde_json::Value) -> Result<ItemId, BrokerError> {
        let response = self
            .client
            .post(self.url("enqueue", topic)?)
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let body: EnqueueResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        Ok(body.id)
    }

    async fn claim(&self, topic: &str) -> Result<Option<ClaimedItem>, BrokerError> {
        let response = self
            .client
            .post(self.url("claim", topic)?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(topic, "No messages");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body: ClaimResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        let payload =
            serde_json::to_vec(&body.payload).map_err(|e| BrokerError::Decode(e.to_string()))?;
        Ok(Some(ClaimedItem {
            id: body.id,
            topic: body.topic,
            payload,
            attempts: body.attempts,
        }))
    }

    async fn ack(&self, id: ItemId) -> Result<bool, BrokerError> {
        let response = self
            .client
            .post(self.url("ack", &id.to_string())?)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(Self::error_for(response).await),
        }
    }

    async fn fail(&self, id: ItemId) -> Result<Option<FailOutcome>, BrokerError> {
        let response = self
            .client
            .post(self.url("fail", &id.to_string())?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;
        match body.status.as_str() {
            "requeued" => Ok(Some(FailOutcome::Requeued)),
            "dead_lettered" => Ok(Some(FailOutcome::DeadLettered {
                topic: body.topic.unwrap_or_default(),
            })),
            other => Err(BrokerError::Decode(format!("unexpected fail status '{}'", other))),
        }
    }
}
