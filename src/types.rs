//! Common types used throughout the lobby service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Opaque identifier for a participant, stable across events
pub type ParticipantId = String;

/// Name of a configured queue
pub type QueueName = String;

/// Identity of one confirmation session or one offline-removal timer.
///
/// Tokens are only ever compared for equality against the slot that issued
/// them; a delayed callback carrying a token that no longer matches is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationToken(u64);

impl GenerationToken {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for GenerationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// A chat message observed by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub participant: ParticipantId,
    /// Display name at the time of the message, if the transport knows it
    pub display_name: Option<String>,
    pub text: String,
    pub channel_id: Option<String>,
    /// Transport handle used to acknowledge the message
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Online/offline transition for a participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub participant: ParticipantId,
    pub online: bool,
    pub timestamp: DateTime<Utc>,
}

/// Participant left the server entirely
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartedEvent {
    pub participant: ParticipantId,
    pub display_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Identity update pushed by the transport's member directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberUpdate {
    pub participant: ParticipantId,
    pub display_name: Option<String>,
    pub operator: bool,
}

/// Union type for all inbound chat events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    Activity(ActivityEvent),
    Presence(PresenceEvent),
    Departed(DepartedEvent),
    MemberUpdate(MemberUpdate),
}

impl ChatEvent {
    /// Participant the event is about
    pub fn participant(&self) -> &str {
        match self {
            ChatEvent::Activity(e) => &e.participant,
            ChatEvent::Presence(e) => &e.participant,
            ChatEvent::Departed(e) => &e.participant,
            ChatEvent::MemberUpdate(e) => &e.participant,
        }
    }
}

/// Delayed callback the engine asks its host to deliver later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerEvent {
    /// Next "are you still here" round of a pending formation
    ConfirmationRound {
        token: GenerationToken,
        attempt: u32,
    },
    /// Remove a participant who went offline and did not come back
    OfflineRemoval {
        participant: ParticipantId,
        token: GenerationToken,
    },
}

/// Message produced by the engine for the transport to deliver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Outbound {
    /// One logical multi-line message to the pickup channel
    Broadcast { lines: Vec<String> },
    /// Acknowledge a candidate who cleared themselves
    NotifyReady {
        participant: ParticipantId,
        message_id: Option<String>,
    },
    /// New pickup channel title reflecting the default queue
    ChannelTitle { title: String },
    /// Operator asked which channel this is
    ChannelIdentity { channel_id: Option<String> },
    /// Operator asked for the operator role identity
    RoleIdentity { requested_by: ParticipantId },
}

/// Side effect requested by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Publish(Outbound),
    Schedule { delay: Duration, timer: TimerEvent },
}

/// Point-in-time view of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: QueueName,
    pub required: usize,
    pub members: Vec<ParticipantId>,
}

/// Point-in-time view of the pending formation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSnapshot {
    pub queue: QueueName,
    pub attempt: u32,
    pub afk_candidates: Vec<ParticipantId>,
}

/// Point-in-time view of the whole engine, published for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub queues: Vec<QueueSnapshot>,
    pub pending: Option<PendingSnapshot>,
    pub formations_started: u64,
    pub formations_completed: u64,
    pub formations_aborted: u64,
    pub taken_at: Option<DateTime<Utc>>,
}
