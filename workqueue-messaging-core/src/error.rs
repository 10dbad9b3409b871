// workqueue-messaging-core/src/error.rs
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("setup error: {0}")]
    Setup(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("acknowledge error: {0}")]
    Acknowledge(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl MessagingError {
    /// Fatal errors end the process; publish and processing failures only
    /// cost the message at hand.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Publish(_) | Self::Processing(_))
    }
}
