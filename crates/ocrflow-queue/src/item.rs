//! Queue item definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Queue item identifier
pub type ItemId = Uuid;

/// Item status
///
/// Acknowledged items are deleted, so there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be claimed once `available_at` has passed
    Pending,
    /// Leased to a worker until `claimed_until`
    Processing,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            other => Err(format!("unknown item status '{}'", other)),
        }
    }
}

/// One unit of pending, in-flight or retrying work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: ItemId,
    pub topic: String,
    /// Opaque payload; the queue never inspects it.
    pub payload: Vec<u8>,
    pub status: ItemStatus,
    /// Incremented on every claim.
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    /// Lease expiry, set only while `status == Processing`.
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Fresh pending item, claimable immediately
    pub fn new(topic: &str, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            payload,
            status: ItemStatus::Pending,
            attempts: 0,
            available_at: now,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Pending && self.available_at <= now
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ItemStatus::Processing
            && self.claimed_until.map(|until| until < now).unwrap_or(false)
    }

    /// pending -> processing
    pub fn claim(&mut self, now: DateTime<Utc>, lease_until: DateTime<Utc>) {
        self.status = ItemStatus::Processing;
        self.claimed_until = Some(lease_until);
        self.attempts += 1;
        self.updated_at = now;
    }

    /// Back to pending on `topic`, claimable from `available_at`
    pub fn reschedule(&mut self, topic: &str, available_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.topic = topic.to_string();
        self.status = ItemStatus::Pending;
        self.claimed_until = None;
        self.available_at = available_at;
        self.updated_at = now;
    }

    /// `document_id` field of a JSON payload, if any
    pub fn document_ref(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.payload).ok()?;
        value
            .get("document_id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_claim_and_reschedule() {
        let now = Utc::now();
        let mut item = QueueItem::new("image_preprocess", b"{}".to_vec(), now);
        assert!(item.is_claimable(now));

        item.claim(now, now + Duration::seconds(120));
        assert_eq!(item.status, ItemStatus::Processing);
        assert_eq!(item.attempts, 1);
        assert!(!item.is_claimable(now));
        assert!(!item.is_lease_expired(now));
        assert!(item.is_lease_expired(now + Duration::seconds(121)));

        let later = now + Duration::seconds(30);
        item.reschedule("image_preprocess", later, now);
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.claimed_until.is_none());
        assert!(!item.is_claimable(now));
        assert!(item.is_claimable(later));
        assert_eq!(item.attempts, 1);
    }

    #[test]
    fn test_document_ref() {
        let now = Utc::now();
        let item = QueueItem::new("t", br#"{"document_id":"abc","owner_id":"u"}"#.to_vec(), now);
        assert_eq!(item.document_ref().as_deref(), Some("abc"));

        let opaque = QueueItem::new("t", vec![0xff, 0x00], now);
        assert!(opaque.document_ref().is_none());
    }
}
