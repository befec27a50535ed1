//! Consumer-side view of the job queue.

pub mod consume;
pub mod rabbitmq;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One delivery of a job message.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub payload: Vec<u8>,
    /// The broker has handed this message out before.
    pub redelivered: bool,
}

/// Terminal decision for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message permanently.
    Ack,
    /// Return the message for redelivery.
    Nack,
}

/// Transport-side throttles for a subscription.
#[derive(Debug, Clone)]
pub struct ReceiveSettings {
    /// Parallel handler invocations run by the transport.
    pub concurrency: usize,
    /// Cap on delivered-but-undisposed messages; 1 serialises processing.
    pub max_outstanding: u16,
    /// Pull one message per request instead of streaming deliveries.
    pub synchronous: bool,
    /// Idle wait between empty pulls in synchronous mode.
    pub poll_interval: Duration,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_outstanding: 1,
            synchronous: false,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl ReceiveSettings {
    /// Number of messages that can actually be in a handler at once.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1).min(self.max_outstanding.max(1) as usize)
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery and decide its disposition. Must not panic.
    async fn handle(&self, message: QueueMessage, cancel: CancellationToken) -> Disposition;
}

/// Producer side of the job queue.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Publish `payload` to `queue`, returning the message id consumers will see.
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<String>;
}

/// Stable identifier for a message the producer did not label.
///
/// Derived from the payload so a redelivery maps to the same id.
pub fn derive_message_id(payload: &[u8]) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, payload).to_string()
}
