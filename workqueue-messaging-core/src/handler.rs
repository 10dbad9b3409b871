// workqueue-messaging-core/src/handler.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::{Delivery, GreetingMessage, MessagingError};

/// Work performed on a delivery before it is acknowledged.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), MessagingError>;
}

/// Fixed processing time per message.
pub const SIMULATED_WORK: Duration = Duration::from_secs(2);

/// Logs the payload and sleeps for a fixed duration.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    pub duration: Duration,
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self {
            duration: SIMULATED_WORK,
        }
    }
}

#[async_trait]
impl MessageHandler for SimulatedWork {
    async fn handle(&self, delivery: &Delivery) -> Result<(), MessagingError> {
        if delivery.is_json() {
            let greeting: GreetingMessage = serde_json::from_slice(&delivery.body)
                .map_err(|e| MessagingError::Processing(format!("invalid JSON payload: {e}")))?;
            info!("Processing message id={} type={}", greeting.id, greeting.kind);
            debug!(?greeting, "message content");
            let age = Utc::now() - greeting.timestamp;
            info!("Message age: {:.2}s", age.num_milliseconds() as f64 / 1000.0);
        } else {
            info!("Received message: {}", delivery.body_text());
        }

        info!("Processing for {:?}", self.duration);
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Acknowledger, CONTENT_TYPE_JSON};

    struct NoopAcker;

    #[async_trait]
    impl Acknowledger for NoopAcker {
        async fn ack(&self, _tag: u64) -> Result<(), MessagingError> {
            Ok(())
        }

        async fn nack(&self, _tag: u64, _requeue: bool) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    fn delivery(content_type: Option<&str>, body: &[u8]) -> Delivery {
        Delivery::new(
            1,
            false,
            content_type.map(str::to_string),
            body.to_vec(),
            Box::new(NoopAcker),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn text_payload_takes_the_configured_time() {
        let work = SimulatedWork::default();
        let started = tokio::time::Instant::now();
        work.handle(&delivery(Some("text/plain"), b"hi")).await.unwrap();
        assert!(started.elapsed() >= SIMULATED_WORK);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_a_processing_failure() {
        let work = SimulatedWork::default();
        let err = work
            .handle(&delivery(Some(CONTENT_TYPE_JSON), b"{not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Processing(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_json_is_accepted() {
        let greeting = GreetingMessage::new(1, Utc::now(), None);
        let body = serde_json::to_vec(&greeting).unwrap();
        SimulatedWork::default()
            .handle(&delivery(Some(CONTENT_TYPE_JSON), &body))
            .await
            .unwrap();
    }
}
