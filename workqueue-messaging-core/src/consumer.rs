// workqueue-messaging-core/src/consumer.rs
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    Delivery, DeliveryStream, MessageHandler, MessagingError, QueueBroker, QueueSpec, TASK_QUEUE,
};

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub queue: QueueSpec,
    pub consumer_tag: String,
    pub prefetch: u16,
    /// Whether a delivery whose processing failed goes back to the queue.
    pub requeue_on_failure: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            queue: QueueSpec::durable(TASK_QUEUE),
            consumer_tag: "task-consumer".to_string(),
            prefetch: 1,
            requeue_on_failure: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    pub acknowledged: u64,
    pub rejected: u64,
}

/// Receives one delivery at a time, hands it to the handler and settles it.
pub struct Consumer<B: QueueBroker + ?Sized> {
    broker: Arc<B>,
    options: ConsumerOptions,
    handler: Arc<dyn MessageHandler>,
}

impl<B: QueueBroker + ?Sized> Consumer<B> {
    pub fn new(broker: Arc<B>, options: ConsumerOptions, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            broker,
            options,
            handler,
        }
    }

    /// Declares the queue, applies the prefetch limit and registers the
    /// subscription. Every failure here is fatal.
    pub async fn start(&self) -> Result<DeliveryStream, MessagingError> {
        let queue = &self.options.queue;
        self.broker.declare_queue(queue).await?;
        info!("Queue '{}' is ready (durable={})", queue.name, queue.durable);

        self.broker.set_prefetch(self.options.prefetch).await?;
        info!("QoS set to prefetch_count={}", self.options.prefetch);

        let deliveries = self
            .broker
            .consume(&queue.name, &self.options.consumer_tag)
            .await?;
        info!(
            consumer_tag = %self.options.consumer_tag,
            "Consumer started. Waiting for messages..."
        );
        Ok(deliveries)
    }

    /// `start` followed by `receive_loop`.
    pub async fn run<F>(&self, shutdown: F) -> Result<ConsumerReport, MessagingError>
    where
        F: Future<Output = ()>,
    {
        let mut deliveries = self.start().await?;
        self.receive_loop(&mut deliveries, shutdown).await
    }

    /// Processes deliveries until `shutdown` resolves. Shutdown is only
    /// observed between deliveries: a delivery that has been received is
    /// always processed and settled first. The stream failing or ending is
    /// fatal.
    pub async fn receive_loop<F>(
        &self,
        deliveries: &mut DeliveryStream,
        shutdown: F,
    ) -> Result<ConsumerReport, MessagingError>
    where
        F: Future<Output = ()>,
    {
        let mut report = ConsumerReport::default();
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Consumer stopped");
                    return Ok(report);
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(delivery, &mut report).await,
                Some(Err(e)) => {
                    error!("delivery error: {e}");
                    return Err(e);
                }
                None => {
                    return Err(MessagingError::Delivery(
                        "delivery stream closed by broker".into(),
                    ))
                }
            }
        }
    }

    async fn process(&self, delivery: Delivery, report: &mut ConsumerReport) {
        let tag = delivery.delivery_tag;
        info!(
            delivery_tag = tag,
            redelivered = delivery.redelivered,
            "Received message at {}",
            Utc::now().to_rfc3339()
        );

        let started = Instant::now();
        match self.handler.handle(&delivery).await {
            Ok(()) => match delivery.ack().await {
                Ok(()) => {
                    report.acknowledged += 1;
                    info!(
                        delivery_tag = tag,
                        "Message processed and acknowledged in {:.2?}",
                        started.elapsed()
                    );
                }
                Err(e) => error!(delivery_tag = tag, "ack failed: {e}"),
            },
            Err(e) => {
                let requeue = self.options.requeue_on_failure;
                warn!(delivery_tag = tag, "processing failed: {e}");
                match delivery.nack(requeue).await {
                    Ok(()) => {
                        report.rejected += 1;
                        warn!(
                            delivery_tag = tag,
                            requeue,
                            "Message rejected after {:.2?}",
                            started.elapsed()
                        );
                    }
                    Err(e) => error!(delivery_tag = tag, "nack failed: {e}"),
                }
            }
        }
    }
}
