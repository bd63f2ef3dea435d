//! AMQP integration for the pickup lobby service
//!
//! This module handles the broker connection, decoding inbound chat events
//! and publishing outbound lobby messages.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{ChatEventConsumer, ChatEventHandler};
pub use messages::*;
pub use publisher::{AmqpLobbyPublisher, LobbyPublisher, LoggingPublisher, MockLobbyPublisher};
