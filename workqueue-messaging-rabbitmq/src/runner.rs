use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{RabbitBroker, RabbitMqOptions};
use workqueue_messaging_core::{
    format_uptime, Consumer, ConsumerOptions, ConsumerReport, MessageHandler, MessagingError,
    Producer, ProducerOptions, ProducerReport, QueueBroker, PUBLISH_INTERVAL,
};

/// Connects, then publishes on the fixed interval until `shutdown` resolves.
pub async fn run_producer<F>(
    opts: &RabbitMqOptions,
    shutdown: F,
) -> Result<ProducerReport, MessagingError>
where
    F: Future<Output = ()>,
{
    let broker = Arc::new(RabbitBroker::connect_with_retry(opts).await?);
    let started_at = Utc::now();

    let mut producer = Producer::new(
        Arc::clone(&broker),
        ProducerOptions {
            queue: opts.queue_spec(),
            interval: PUBLISH_INTERVAL,
            format: opts.payload_format,
            hostname: opts.hostname.clone(),
        },
    );
    let outcome = producer.run(shutdown).await;

    close(broker.as_ref(), started_at).await;
    outcome
}

/// Connects, then consumes with `handler` until `shutdown` resolves.
pub async fn run_consumer<F>(
    opts: &RabbitMqOptions,
    handler: Arc<dyn MessageHandler>,
    shutdown: F,
) -> Result<ConsumerReport, MessagingError>
where
    F: Future<Output = ()>,
{
    let broker = Arc::new(RabbitBroker::connect_with_retry(opts).await?);
    let started_at = Utc::now();
    info!("Consumer started at {}", started_at.to_rfc3339());

    let consumer = Consumer::new(
        Arc::clone(&broker),
        ConsumerOptions {
            queue: opts.queue_spec(),
            consumer_tag: format!("consumer-{}", Uuid::new_v4()),
            prefetch: opts.prefetch,
            requeue_on_failure: true,
        },
        handler,
    );
    let outcome = consumer.run(shutdown).await;

    if broker.is_connected() {
        close(broker.as_ref(), started_at).await;
    }
    outcome
}

async fn close<B: QueueBroker + ?Sized>(broker: &B, started_at: chrono::DateTime<Utc>) {
    match broker.close().await {
        Ok(()) => info!(
            "Connection closed gracefully | Uptime: {}",
            format_uptime(Utc::now() - started_at)
        ),
        Err(e) => warn!("failed to close connection: {e}"),
    }
}
