//! Queue abstraction

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue service could not be reached
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// Message was already deleted or its receipt expired
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Message body could not be produced
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message received from the queue
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,

    /// Receipt required to delete this delivery
    pub pop_receipt: String,

    /// JSON body (a [`WorkerMessage`](crate::model::WorkerMessage))
    pub body: String,

    /// How many times the queue has handed this message out
    pub dequeue_count: u32,

    pub inserted_at: DateTime<Utc>,
}

/// Receiving side of a queue
///
/// No FIFO guarantee is assumed.
#[async_trait]
pub trait QueueReader: Send + Sync {
    /// Receive up to `max_messages`, hiding them for `visibility_timeout`
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a received message permanently
    async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

/// Sending side of a queue
#[async_trait]
pub trait QueueWriter: Send + Sync {
    /// Add a message, optionally invisible until `visibility_delay` elapses
    async fn add_message(
        &self,
        content: String,
        visibility_delay: Option<Duration>,
    ) -> Result<(), QueueError>;
}
