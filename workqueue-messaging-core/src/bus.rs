// workqueue-messaging-core/src/bus.rs
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{Delivery, MessagingError, OutgoingMessage, QueueSpec};

/// Unbounded, lazily produced sequence of deliveries from one subscription.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, MessagingError>>;

/// The slice of a broker channel the producer and consumer loops need.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Idempotent: redeclaring with the same properties is a no-op.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), MessagingError>;

    /// Publishes on the default exchange with the queue name as routing key.
    async fn publish(&self, queue: &str, message: &OutgoingMessage) -> Result<(), MessagingError>;

    /// Caps unacknowledged deliveries in flight on this channel.
    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError>;

    /// Registers a consumer with explicit acknowledgements.
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, MessagingError>;

    async fn close(&self) -> Result<(), MessagingError>;
}
