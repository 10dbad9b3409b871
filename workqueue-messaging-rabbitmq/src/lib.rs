mod options;
mod rabbit_broker;
mod runner;
mod signal;

pub use options::{RabbitMqOptions, DEFAULT_RABBITMQ_URL};
pub use rabbit_broker::RabbitBroker;
pub use runner::{run_consumer, run_producer};
pub use signal::shutdown_signal;
