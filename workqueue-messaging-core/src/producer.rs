// workqueue-messaging-core/src/producer.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::{
    message_body, GreetingMessage, MessagingError, OutgoingMessage, PayloadFormat, QueueBroker,
    QueueSpec, TASK_QUEUE,
};

/// Fixed delay between two publishes.
pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(5);

const MILESTONE_EVERY: u64 = 10;

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub queue: QueueSpec,
    pub interval: Duration,
    pub format: PayloadFormat,
    /// Reported in JSON payloads.
    pub hostname: Option<String>,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            queue: QueueSpec::durable(TASK_QUEUE),
            interval: PUBLISH_INTERVAL,
            format: PayloadFormat::Text,
            hostname: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub published: u64,
    pub failed: u64,
}

/// Publishes numbered greetings to a queue on a fixed timer.
pub struct Producer<B: QueueBroker + ?Sized> {
    broker: Arc<B>,
    options: ProducerOptions,
    sequence: u64,
    started_at: DateTime<Utc>,
    report: ProducerReport,
}

impl<B: QueueBroker + ?Sized> Producer<B> {
    pub fn new(broker: Arc<B>, options: ProducerOptions) -> Self {
        Self {
            broker,
            options,
            sequence: 0,
            started_at: Utc::now(),
            report: ProducerReport::default(),
        }
    }

    /// Number of the most recent publish attempt.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn report(&self) -> ProducerReport {
        self.report
    }

    pub async fn declare_queue(&self) -> Result<(), MessagingError> {
        let queue = &self.options.queue;
        info!("Setting up queue: {}", queue.name);
        self.broker.declare_queue(queue).await?;
        info!("Queue '{}' is ready (durable={})", queue.name, queue.durable);
        Ok(())
    }

    fn build(&self, n: u64) -> Result<OutgoingMessage, MessagingError> {
        match self.options.format {
            PayloadFormat::Text => Ok(OutgoingMessage::text(message_body(n))),
            PayloadFormat::Json => OutgoingMessage::json(&GreetingMessage::new(
                n,
                self.started_at,
                self.options.hostname.clone(),
            )),
        }
    }

    /// Publishes the next numbered message. The counter advances on every
    /// call, so a failed publish leaves a gap rather than being retried.
    pub async fn publish_next(&mut self) -> Result<u64, MessagingError> {
        self.sequence = self.sequence.wrapping_add(1);
        let n = self.sequence;
        let message = self.build(n)?;

        match self.broker.publish(&self.options.queue.name, &message).await {
            Ok(()) => {
                self.report.published += 1;
                info!(sequence = n, size = message.body.len(), "Sent: {}", message_body(n));
                if self.report.published % MILESTONE_EVERY == 0 {
                    info!("Milestone: {} messages sent", self.report.published);
                }
                Ok(n)
            }
            Err(e) => {
                self.report.failed += 1;
                error!(sequence = n, "Failed to publish a message: {e}");
                Err(e)
            }
        }
    }

    /// Declares the queue, then publishes until `shutdown` resolves.
    /// Publish failures are logged and skipped; anything fatal is returned.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<ProducerReport, MessagingError>
    where
        F: Future<Output = ()>,
    {
        self.declare_queue().await?;
        self.started_at = Utc::now();
        info!("Starting message production at {}", self.started_at.to_rfc3339());

        tokio::pin!(shutdown);
        loop {
            if let Err(e) = self.publish_next().await {
                if e.is_fatal() {
                    return Err(e);
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }

        info!(
            published = self.report.published,
            failed = self.report.failed,
            "Producer stopped"
        );
        Ok(self.report)
    }
}
