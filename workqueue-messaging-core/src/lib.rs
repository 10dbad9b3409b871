pub mod bus;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod logging;
pub mod memory;
pub mod producer;
pub mod retry;
pub mod types;

pub use bus::{DeliveryStream, QueueBroker};
pub use consumer::{Consumer, ConsumerOptions, ConsumerReport};
pub use error::MessagingError;
pub use handler::{MessageHandler, SimulatedWork, SIMULATED_WORK};
pub use memory::InMemoryBroker;
pub use producer::{Producer, ProducerOptions, ProducerReport, PUBLISH_INTERVAL};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::{
    format_uptime, message_body, Acknowledger, Delivery, GreetingMessage, OutgoingMessage,
    PayloadFormat, QueueSpec, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, TASK_QUEUE,
};
