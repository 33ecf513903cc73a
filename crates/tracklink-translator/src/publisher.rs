//! Outbound publish capability.
//!
//! The transport behind [`Publisher`] (an MQTT client, a message bus) is
//! owned elsewhere. Implementations must return quickly: they are called
//! inline from connection tasks.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish queue full ({capacity} documents)")]
    QueueFull { capacity: usize },

    #[error("Publisher closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A topic-addressed JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub topic: String,
    pub payload: Value,
}

impl Document {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

pub trait Publisher: Send + Sync {
    /// Best-effort hand-off of one document.
    fn publish(&self, document: Document) -> Result<(), PublishError>;
}

/// Logs every document instead of sending it.
///
/// Used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, document: Document) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&document.payload)?;
        info!(topic = %document.topic, %payload, "Simulated publish");
        Ok(())
    }
}

/// Queues documents on a bounded channel for an external transport task.
///
/// A full queue is reported as a failure rather than waited on.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Document>,
    capacity: usize,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Document>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, document: Document) -> Result<(), PublishError> {
        self.tx.try_send(document).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}
