//! AMQP message handlers for inbound chat events
//!
//! The consumer decodes each delivery into a [`ChatEvent`] and hands it to a
//! [`ChatEventHandler`]. Deliveries are acknowledged once handled; malformed
//! ones are acknowledged too, after being reported, so they are not redelivered.

use crate::amqp::messages::MessageUtils;
use crate::error::{LobbyError, Result};
use crate::types::ChatEvent;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound chat events
#[async_trait]
pub trait ChatEventHandler: Send + Sync {
    /// Handle one decoded chat event
    async fn handle_chat_event(&self, event: ChatEvent) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: LobbyError, message_data: &[u8]);
}

/// Consumer for the inbound chat event queue
pub struct ChatEventConsumer {
    handler: Arc<dyn ChatEventHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl ChatEventConsumer {
    /// Create a new chat event consumer
    pub fn new(handler: Arc<dyn ChatEventHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("pickup-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(EventConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| LobbyError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming chat events from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| LobbyError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming chat events");
        Ok(())
    }
}

/// Internal consumer implementation
struct EventConsumer {
    handler: Arc<dyn ChatEventHandler>,
}

impl EventConsumer {
    fn new(handler: Arc<dyn ChatEventHandler>) -> Self {
        Self { handler }
    }

    /// Decode and forward one delivery
    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let event = MessageUtils::deserialize_chat_event(content)?;
        debug!("Chat event decoded for participant '{}'", event.participant());
        self.handler.handle_chat_event(event).await
    }
}

#[async_trait]
impl AsyncConsumer for EventConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = std::time::Instant::now();

        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        match self.process_message(&content).await {
            Ok(()) => {
                debug!(
                    "Message processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                error!(
                    "Message processing failed - delivery_tag: {}, error: {}",
                    delivery_tag, e
                );
                let error = match e.downcast::<LobbyError>() {
                    Ok(lobby_error) => lobby_error,
                    Err(other) => LobbyError::InternalError {
                        message: other.to_string(),
                    },
                };
                self.handler.handle_error(error, &content).await;
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Mock chat event handler for testing
pub struct MockChatEventHandler {
    pub received_events: Arc<tokio::sync::Mutex<Vec<ChatEvent>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<LobbyError>>>,
}

impl Default for MockChatEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatEventHandler {
    pub fn new() -> Self {
        Self {
            received_events: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ChatEventHandler for MockChatEventHandler {
    async fn handle_chat_event(&self, event: ChatEvent) -> Result<()> {
        self.received_events.lock().await.push(event);
        Ok(())
    }

    async fn handle_error(&self, error: LobbyError, _message_data: &[u8]) {
        self.errors.lock().await.push(error);
    }
}
