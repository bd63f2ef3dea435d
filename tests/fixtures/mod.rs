//! Test fixtures shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use pickup_lobby::config::{LobbySettings, QueueDefinition};
use pickup_lobby::lobby::{InMemoryDirectory, LobbyEngine};
use pickup_lobby::types::{
    ActivityEvent, ChatEvent, DepartedEvent, Effect, MemberUpdate, Outbound, PresenceEvent,
    TimerEvent,
};
use std::sync::Arc;

/// Fixed reference time so inactivity arithmetic is deterministic
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 19, 0, 0).unwrap()
}

pub fn minutes_before(minutes: i64) -> DateTime<Utc> {
    t0() - Duration::minutes(minutes)
}

/// duel(2), ffa(3), ctf(8) with duel as the default queue
pub fn lobby_settings() -> LobbySettings {
    LobbySettings {
        queues: vec![
            QueueDefinition::new("duel", 2),
            QueueDefinition::new("ffa", 3),
            QueueDefinition::new("ctf", 8),
        ],
        default_queue: "duel".to_string(),
        ..LobbySettings::default()
    }
}

/// Engine plus the directory it consults, with the startup title already drained
pub struct TestLobby {
    pub engine: LobbyEngine,
    pub directory: Arc<InMemoryDirectory>,
}

impl TestLobby {
    pub fn new() -> Self {
        Self::with_settings(lobby_settings())
    }

    pub fn with_settings(settings: LobbySettings) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let mut engine = LobbyEngine::new(settings, directory.clone());
        engine.refresh_channel_title();
        engine.drain_effects();
        Self { engine, directory }
    }

    /// Register an operator with the directory
    pub fn operator(&self, participant: &str, name: &str) {
        self.directory.apply_update(&MemberUpdate {
            participant: participant.to_string(),
            display_name: Some(name.to_string()),
            operator: true,
        });
    }

    /// Feed a chat message and return the effects it produced
    pub fn say(&mut self, participant: &str, text: &str, at: DateTime<Utc>) -> Vec<Effect> {
        self.engine.handle_event(&activity(participant, text, at));
        self.engine.drain_effects()
    }

    pub fn presence(&mut self, participant: &str, online: bool, at: DateTime<Utc>) -> Vec<Effect> {
        self.engine.handle_event(&ChatEvent::Presence(PresenceEvent {
            participant: participant.to_string(),
            online,
            timestamp: at,
        }));
        self.engine.drain_effects()
    }

    pub fn depart(&mut self, participant: &str, name: Option<&str>) -> Vec<Effect> {
        self.engine.handle_event(&ChatEvent::Departed(DepartedEvent {
            participant: participant.to_string(),
            display_name: name.map(str::to_string),
            timestamp: t0(),
        }));
        self.engine.drain_effects()
    }

    pub fn fire(&mut self, timer: TimerEvent) -> Vec<Effect> {
        self.engine.on_timer(timer, t0());
        self.engine.drain_effects()
    }

    pub fn members(&self, queue: &str) -> Vec<String> {
        self.engine
            .registry()
            .get(queue)
            .map(|q| q.members().to_vec())
            .unwrap_or_default()
    }
}

pub fn activity(participant: &str, text: &str, at: DateTime<Utc>) -> ChatEvent {
    ChatEvent::Activity(ActivityEvent {
        participant: participant.to_string(),
        display_name: Some(format!("player{}", participant)),
        text: text.to_string(),
        channel_id: None,
        message_id: Some(format!("msg-{}", participant)),
        timestamp: at,
    })
}

pub fn broadcasts(effects: &[Effect]) -> Vec<Vec<String>> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Publish(Outbound::Broadcast { lines }) => Some(lines.clone()),
            _ => None,
        })
        .collect()
}

pub fn timers(effects: &[Effect]) -> Vec<TimerEvent> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Schedule { timer, .. } => Some(timer.clone()),
            _ => None,
        })
        .collect()
}

pub fn published(effects: &[Effect]) -> Vec<Outbound> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Publish(outbound) => Some(outbound.clone()),
            _ => None,
        })
        .collect()
}

/// Whether any broadcast line contains `needle`
pub fn announced(effects: &[Effect], needle: &str) -> bool {
    broadcasts(effects)
        .iter()
        .any(|lines| lines.iter().any(|line| line.contains(needle)))
}
