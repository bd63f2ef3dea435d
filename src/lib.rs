//! Pickup Lobby - queue formation service for chat-organised pickup games
//!
//! Participants join named queues from a chat channel. When a queue fills,
//! members who have been quiet are asked to confirm before the game is
//! announced; unresponsive members are removed after a bounded number of
//! rounds. Chat events arrive over AMQP and lobby messages leave the same way.

pub mod amqp;
pub mod config;
pub mod error;
pub mod lobby;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LobbyError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::LobbyPublisher;
pub use lobby::{Directory, InMemoryDirectory, JoinOutcome, LobbyEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
