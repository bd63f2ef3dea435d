//! AMQP message definitions and serialization

use crate::error::{LobbyError, Result};
use crate::types::{ChatEvent, Outbound};
use serde_json;

/// Default AMQP queue and exchange names
pub const CHAT_EVENTS_QUEUE: &str = "pickup.chat_events";
pub const LOBBY_OUTBOUND_EXCHANGE: &str = "pickup.outbound";

/// Routing keys for outbound messages
pub const BROADCAST_ROUTING_KEY: &str = "lobby.broadcast";
pub const NOTIFY_READY_ROUTING_KEY: &str = "lobby.notify_ready";
pub const CHANNEL_TITLE_ROUTING_KEY: &str = "lobby.channel_title";
pub const CHANNEL_IDENTITY_ROUTING_KEY: &str = "lobby.channel_identity";
pub const ROLE_IDENTITY_ROUTING_KEY: &str = "lobby.role_identity";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            LobbyError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            LobbyError::InvalidEvent {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a chat event to bytes
    pub fn serialize_chat_event(event: &ChatEvent) -> Result<Vec<u8>> {
        Self::validate_chat_event(event)?;
        serde_json::to_vec(event).map_err(|e| {
            LobbyError::InternalError {
                message: format!("Failed to serialize chat event: {}", e),
            }
            .into()
        })
    }

    /// Deserialize a chat event from bytes
    pub fn deserialize_chat_event(bytes: &[u8]) -> Result<ChatEvent> {
        let event: ChatEvent =
            serde_json::from_slice(bytes).map_err(|e| LobbyError::InvalidEvent {
                reason: format!("Failed to deserialize chat event: {}", e),
            })?;

        Self::validate_chat_event(&event)?;
        Ok(event)
    }

    /// Validate a chat event
    pub fn validate_chat_event(event: &ChatEvent) -> Result<()> {
        if event.participant().trim().is_empty() {
            return Err(LobbyError::InvalidEvent {
                reason: "Participant ID cannot be empty".to_string(),
            }
            .into());
        }

        if let ChatEvent::Activity(activity) = event {
            if activity.channel_id.as_deref() == Some("") {
                return Err(LobbyError::InvalidEvent {
                    reason: "Channel ID cannot be empty when present".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            LobbyError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for an outbound message
    pub fn get_routing_key(message: &Outbound) -> &'static str {
        match message {
            Outbound::Broadcast { .. } => BROADCAST_ROUTING_KEY,
            Outbound::NotifyReady { .. } => NOTIFY_READY_ROUTING_KEY,
            Outbound::ChannelTitle { .. } => CHANNEL_TITLE_ROUTING_KEY,
            Outbound::ChannelIdentity { .. } => CHANNEL_IDENTITY_ROUTING_KEY,
            Outbound::RoleIdentity { .. } => ROLE_IDENTITY_ROUTING_KEY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityEvent, PresenceEvent};

    fn create_test_activity() -> ChatEvent {
        ChatEvent::Activity(ActivityEvent {
            participant: "1234".to_string(),
            display_name: Some("tester".to_string()),
            text: "!add duel".to_string(),
            channel_id: Some("555".to_string()),
            message_id: Some("777".to_string()),
            timestamp: chrono::Utc::now(),
        })
    }

    #[test]
    fn test_message_envelope_creation() {
        let outbound = Outbound::ChannelTitle {
            title: "pickup".to_string(),
        };
        let envelope = MessageEnvelope::new(outbound, CHANNEL_TITLE_ROUTING_KEY.to_string());

        assert_eq!(envelope.routing_key, CHANNEL_TITLE_ROUTING_KEY);
        assert!(!envelope.correlation_id.is_empty());

        let bytes = envelope.to_bytes().unwrap();
        let decoded = MessageEnvelope::<Outbound>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.correlation_id, envelope.correlation_id);
    }

    #[test]
    fn test_chat_event_validation() {
        assert!(MessageUtils::validate_chat_event(&create_test_activity()).is_ok());

        let empty = ChatEvent::Presence(PresenceEvent {
            participant: "  ".to_string(),
            online: true,
            timestamp: chrono::Utc::now(),
        });
        assert!(MessageUtils::validate_chat_event(&empty).is_err());

        let mut blank_channel = create_test_activity();
        if let ChatEvent::Activity(ref mut activity) = blank_channel {
            activity.channel_id = Some(String::new());
        }
        assert!(MessageUtils::validate_chat_event(&blank_channel).is_err());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let err = MessageUtils::deserialize_chat_event(b"{not json").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LobbyError>(),
            Some(LobbyError::InvalidEvent { .. })
        ));

        let bytes = MessageUtils::serialize_chat_event(&create_test_activity()).unwrap();
        let event = MessageUtils::deserialize_chat_event(&bytes).unwrap();
        assert_eq!(event.participant(), "1234");
    }

    #[test]
    fn test_routing_key_generation() {
        let broadcast = Outbound::Broadcast { lines: vec![] };
        assert_eq!(
            MessageUtils::get_routing_key(&broadcast),
            BROADCAST_ROUTING_KEY
        );

        let ready = Outbound::NotifyReady {
            participant: "1".to_string(),
            message_id: None,
        };
        assert_eq!(
            MessageUtils::get_routing_key(&ready),
            NOTIFY_READY_ROUTING_KEY
        );
    }
}
