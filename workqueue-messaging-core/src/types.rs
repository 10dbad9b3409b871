// workqueue-messaging-core/src/types.rs
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MessagingError;

/// Name of the work queue shared by producer and consumer.
pub const TASK_QUEUE: &str = "task_queue";

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Queue declaration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Durable, shared, never auto-deleted.
    pub fn durable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub content_type: String,
    pub persistent: bool,
}

impl OutgoingMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into().into_bytes(),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            persistent: true,
        }
    }

    pub fn json<T: Serialize>(payload: &T) -> Result<Self, MessagingError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| MessagingError::Serialization(e.to_string()))?;
        Ok(Self {
            body,
            content_type: CONTENT_TYPE_JSON.to_string(),
            persistent: true,
        })
    }
}

/// Settles deliveries on the channel they arrived on.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError>;
}

/// A received message together with the capability to settle it.
///
/// `ack` and `nack` take `self`, so a delivery is settled at most once.
/// Dropping it unsettled leaves it unacknowledged until the channel closes.
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        content_type: Option<String>,
        body: Vec<u8>,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            content_type,
            body,
            acker,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_json(&self) -> bool {
        self.content_type.as_deref() == Some(CONTENT_TYPE_JSON)
    }

    pub async fn ack(self) -> Result<(), MessagingError> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), MessagingError> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("content_type", &self.content_type)
            .field("len", &self.body.len())
            .finish()
    }
}

/// JSON payload emitted when the producer runs with [`PayloadFormat::Json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreetingMessage {
    pub id: u64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl GreetingMessage {
    pub const KIND: &'static str = "greeting";

    pub fn new(id: u64, started_at: DateTime<Utc>, hostname: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            content: message_body(id),
            timestamp: now,
            kind: Self::KIND.to_string(),
            producer_uptime: Some(format_uptime(now - started_at)),
            hostname,
        }
    }
}

/// Wire format of the producer's payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for PayloadFormat {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(MessagingError::Configuration(format!(
                "unknown payload format: {other}"
            ))),
        }
    }
}

/// Body text for message number `n`.
pub fn message_body(n: u64) -> String {
    format!("Hello from producer! Message #{n}")
}

/// `HH:MM:SS` rendering of an elapsed duration; negative spans clamp to zero.
pub fn format_uptime(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
