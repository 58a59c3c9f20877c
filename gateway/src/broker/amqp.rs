//! RabbitMQ broker backed by `lapin`.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;

use crate::config::BrokerConfig;

use super::{BrokerError, MessageBroker, OutboundMessage, ReplyMessage, REPLY_CHANNEL_CAPACITY};

/// RabbitMQ direct reply-to pseudo-queue, shared by all bounded-wait callers.
pub const DIRECT_REPLY_TO: &str = "amq.rabbitmq.reply-to";

const CONSUMER_TAG: &str = "procapi-reply-consumer";

/// One long-lived AMQP connection and channel for the whole process.
///
/// Direct reply-to requires the consumer and the publisher to share a channel,
/// so every publish goes through the same channel that consumes replies.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl AmqpBroker {
    /// Connect and declare the work queue.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        tracing::info!(
            host = %config.hostname,
            port = config.port,
            vhost = %config.virtual_host,
            "Connecting to RabbitMQ"
        );

        let connection = Connection::connect_uri(config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        channel
            .queue_declare(
                &config.queue_name,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tracing::info!(queue = %config.queue_name, "Declared work queue");

        Ok(Self {
            connection,
            channel,
            queue_name: config.queue_name.clone(),
        })
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default();
        if let Some(tag) = message.reply_tag {
            properties = properties
                .with_reply_to(ShortString::from(DIRECT_REPLY_TO))
                .with_correlation_id(ShortString::from(tag));
        }

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn subscribe_replies(&self) -> Result<mpsc::Receiver<ReplyMessage>, BrokerError> {
        let mut consumer = self
            .channel
            .basic_consume(
                DIRECT_REPLY_TO,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("Reply consumer error: {}", e);
                        break;
                    }
                };

                let reply = ReplyMessage {
                    correlation_id: delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .map(|id| id.as_str().to_string()),
                    body: delivery.data,
                };

                if tx.send(reply).await.is_err() {
                    tracing::debug!("Reply receiver dropped, stopping consumer");
                    break;
                }
            }
            tracing::info!("Reply consumer stopped");
        });

        Ok(rx)
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "gateway shutdown").await {
            tracing::warn!("Failed to close AMQP channel: {}", e);
        }
        if let Err(e) = self.connection.close(200, "gateway shutdown").await {
            tracing::warn!("Failed to close AMQP connection: {}", e);
        }
        tracing::info!("RabbitMQ connection closed");
    }
}
