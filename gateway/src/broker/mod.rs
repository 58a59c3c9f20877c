//! Message broker abstraction.
//!
//! The gateway publishes envelopes to the backend work queue and receives
//! bounded-wait replies on one shared reply destination. Each bounded-wait
//! publish carries a unique reply tag; the backend echoes it back as the reply's
//! correlation id so the gateway can route the reply to its waiter.

mod amqp;

pub use amqp::AmqpBroker;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the channel carrying replies from the broker to the gateway.
pub const REPLY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    Connection(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Reply subscription failed: {0}")]
    Subscribe(String),
}

/// A message to publish on the work queue.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    /// Set for bounded-wait requests: the reply must be sent to the shared
    /// reply destination carrying this tag as its correlation id.
    pub reply_tag: Option<String>,
}

impl OutboundMessage {
    pub fn fire_and_forget(body: Vec<u8>) -> Self {
        Self {
            body,
            reply_tag: None,
        }
    }

    pub fn expecting_reply(body: Vec<u8>, reply_tag: impl Into<String>) -> Self {
        Self {
            body,
            reply_tag: Some(reply_tag.into()),
        }
    }
}

/// A reply delivered on the shared reply destination.
#[derive(Debug, Clone)]
pub struct ReplyMessage {
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

/// Connection to the backend work queue.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a message to the backend work queue.
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Start receiving replies from the shared reply destination.
    ///
    /// Called once per gateway. The stream ends when the connection is lost or closed.
    async fn subscribe_replies(&self) -> Result<mpsc::Receiver<ReplyMessage>, BrokerError>;

    /// Release the connection.
    async fn close(&self);
}
