//! Error types for the pickup lobby service
//!
//! Membership validation misses are modeled as errors so the registry can
//! report them, but the engine absorbs them locally and never surfaces them
//! to participants.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific lobby scenarios
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("Queue not found: {name}")]
    QueueNotFound { name: String },

    #[error("Participant {participant} is already in queue {queue}")]
    AlreadyQueued { participant: String, queue: String },

    #[error("Participant {participant} is not in queue {queue}")]
    NotQueued { participant: String, queue: String },

    #[error("Queue is full: {queue}")]
    QueueFull { queue: String },

    #[error("A formation is pending for queue {queue}")]
    FormationPending { queue: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid inbound event: {reason}")]
    InvalidEvent { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl LobbyError {
    /// Whether this error is an expected membership miss that callers skip silently
    pub fn is_validation_miss(&self) -> bool {
        matches!(
            self,
            LobbyError::QueueNotFound { .. }
                | LobbyError::AlreadyQueued { .. }
                | LobbyError::NotQueued { .. }
                | LobbyError::QueueFull { .. }
        )
    }
}
