//! Queue message and consumer interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// A received, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Stream entry id, used to acknowledge
    pub id: String,
    /// Raw notification JSON
    pub body: String,
    /// How many times this message has been delivered, starting at 1
    pub receive_count: u64,
}

impl QueueMessage {
    pub fn new(id: impl Into<String>, body: impl Into<String>, receive_count: u64) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receive_count,
        }
    }
}

/// At-least-once message source.
///
/// A received message stays invisible to other consumers until it is
/// acknowledged or its visibility timeout expires, after which it is
/// delivered again with a higher receive count.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Long-poll for up to `max` messages, waiting at most `wait`.
    async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>>;

    /// Remove a message permanently.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;
}
