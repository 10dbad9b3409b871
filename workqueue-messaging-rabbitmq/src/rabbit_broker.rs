use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery as LapinDelivery, options::*, types::FieldTable, uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::{info, warn};

use crate::options::RabbitMqOptions;
use workqueue_messaging_core::{
    retry_with_backoff, Acknowledger, Delivery, DeliveryStream, MessagingError, OutgoingMessage,
    QueueBroker, QueueSpec,
};

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// One AMQP connection with a single channel, owned by the process.
pub struct RabbitBroker {
    conn: Connection,
    channel: Channel,
}

impl RabbitBroker {
    pub async fn connect(uri: AMQPUri, confirms: bool) -> Result<Self, MessagingError> {
        let conn = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(connect_error)?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Setup(format!("failed to open a channel: {e}")))?;

        if confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| MessagingError::Setup(format!("confirm_select failed: {e}")))?;
        }

        info!("Successfully connected to RabbitMQ (confirms={confirms})");
        Ok(Self { conn, channel })
    }

    /// Waits `startup_delay`, then connects with the configured backoff.
    pub async fn connect_with_retry(opts: &RabbitMqOptions) -> Result<Self, MessagingError> {
        if !opts.startup_delay.is_zero() {
            info!("Waiting {:?} before connecting", opts.startup_delay);
            tokio::time::sleep(opts.startup_delay).await;
        }

        info!("Connecting to RabbitMQ at {}", opts.redacted_uri());
        retry_with_backoff(&opts.retry, "connect to RabbitMQ", |_| {
            Self::connect(opts.uri.clone(), opts.confirms)
        })
        .await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.status().connected()
    }
}

/// Socket-level failures may clear once the broker is up; a broker that
/// answers and refuses (credentials, vhost) will not.
fn connect_error(e: lapin::Error) -> MessagingError {
    match e {
        lapin::Error::IOError(_) | lapin::Error::InvalidConnectionState(_) => {
            MessagingError::Connection(e.to_string())
        }
        _ => MessagingError::Setup(format!("connection refused by broker: {e}")),
    }
}

#[async_trait]
impl QueueBroker for RabbitBroker {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), MessagingError> {
        self.channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    auto_delete: spec.auto_delete,
                    exclusive: spec.exclusive,
                    nowait: false,
                    passive: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Setup(format!("failed to declare a queue: {e}")))?;
        Ok(())
    }

    async fn publish(&self, queue: &str, message: &OutgoingMessage) -> Result<(), MessagingError> {
        let delivery_mode = if message.persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };
        let properties = BasicProperties::default()
            .with_content_type(message.content_type.clone().into())
            .with_delivery_mode(delivery_mode);

        // default exchange, routing key = queue name
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &message.body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?;

        if confirm.is_nack() {
            return Err(MessagingError::Publish(
                "publisher confirm NACK".to_string(),
            ));
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError> {
        self.channel
            .basic_qos(count, BasicQosOptions { global: false })
            .await
            .map_err(|e| MessagingError::Setup(format!("failed to set QoS: {e}")))
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    no_local: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Setup(format!("failed to register a consumer: {e}")))?;

        let channel = self.channel.clone();
        Ok(consumer
            .map(move |delivery| {
                delivery
                    .map(|d| into_delivery(d, channel.clone()))
                    .map_err(|e| MessagingError::Delivery(e.to_string()))
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "Normal shutdown").await {
            warn!("channel close failed: {e}");
        }
        self.conn
            .close(REPLY_SUCCESS, "Normal shutdown")
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))
    }
}

fn into_delivery(delivery: LapinDelivery, channel: Channel) -> Delivery {
    let content_type = delivery
        .properties
        .content_type()
        .as_ref()
        .map(|ct| ct.as_str().to_string());
    Delivery::new(
        delivery.delivery_tag,
        delivery.redelivered,
        content_type,
        delivery.data,
        Box::new(ChannelAcker(channel)),
    )
}

/// Settles single deliveries on the channel they arrived on.
struct ChannelAcker(Channel);

#[async_trait]
impl Acknowledger for ChannelAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.0
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), MessagingError> {
        self.0
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }
}
