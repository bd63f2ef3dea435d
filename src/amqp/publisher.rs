//! AMQP publisher for outbound lobby messages

use crate::amqp::messages::{MessageEnvelope, MessageUtils};
use crate::error::{LobbyError, Result};
use crate::types::Outbound;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for delivering outbound lobby messages to the chat transport
#[async_trait]
pub trait LobbyPublisher: Send + Sync {
    /// Publish one outbound message
    async fn publish(&self, message: Outbound) -> Result<()>;
}

/// Configuration for outbound publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: crate::amqp::messages::LOBBY_OUTBOUND_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based publisher implementation
pub struct AmqpLobbyPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpLobbyPublisher {
    /// Create a new publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    /// Declare the outbound topic exchange
    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            LobbyError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ),
            }
        })?;

        info!("Declared outbound exchange '{}'", self.config.exchange);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish_with_retry(&self, envelope: &MessageEnvelope<Outbound>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<Outbound>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        let timeout = Duration::from_millis(self.config.publish_timeout_ms);
        tokio::time::timeout(
            timeout,
            self.channel.basic_publish(properties, payload, args),
        )
        .await
        .map_err(|_| LobbyError::AmqpConnectionFailed {
            message: format!("Publish timed out after {:?}", timeout),
        })?
        .map_err(|e| LobbyError::AmqpConnectionFailed {
            message: format!("Failed to publish message: {}", e),
        })?;

        Ok(())
    }
}

#[async_trait]
impl LobbyPublisher for AmqpLobbyPublisher {
    async fn publish(&self, message: Outbound) -> Result<()> {
        let routing_key = MessageUtils::get_routing_key(&message).to_string();
        let envelope = MessageEnvelope::new(message, routing_key);
        self.publish_with_retry(&envelope).await
    }
}

/// Publisher that only logs; used for dry runs and local experiments
#[derive(Debug, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl LobbyPublisher for LoggingPublisher {
    async fn publish(&self, message: Outbound) -> Result<()> {
        match &message {
            Outbound::Broadcast { lines } => {
                for line in lines {
                    info!("[broadcast] {}", line);
                }
            }
            other => info!("[{}] {:?}", MessageUtils::get_routing_key(other), other),
        }
        Ok(())
    }
}

/// Mock publisher for testing
#[derive(Debug, Default)]
pub struct MockLobbyPublisher {
    published: std::sync::Mutex<Vec<Outbound>>,
}

impl MockLobbyPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<Outbound> {
        self.published
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Only the broadcast bodies
    pub fn broadcasts(&self) -> Vec<Vec<String>> {
        self.published()
            .into_iter()
            .filter_map(|message| match message {
                Outbound::Broadcast { lines } => Some(lines),
                _ => None,
            })
            .collect()
    }

    /// Clear published messages
    pub fn clear(&self) {
        if let Ok(mut messages) = self.published.lock() {
            messages.clear();
        }
    }
}

#[async_trait]
impl LobbyPublisher for MockLobbyPublisher {
    async fn publish(&self, message: Outbound) -> Result<()> {
        if let Ok(mut messages) = self.published.lock() {
            messages.push(message);
        }
        Ok(())
    }
}
