//! The single task that owns the lobby engine
//!
//! Inbound events and fired timers are serialized through one mpsc channel.
//! After every command the runner executes the engine's effects in order:
//! publishes go to the [`LobbyPublisher`], schedule requests become sleeping
//! tasks that send their timer back into the same channel. Timer tasks only
//! hold a weak sender, so the channel closes once every handle is gone.

use crate::amqp::handlers::ChatEventHandler;
use crate::amqp::publisher::LobbyPublisher;
use crate::error::{LobbyError, Result};
use crate::lobby::{InMemoryDirectory, LobbyEngine, LobbyEngineStats};
use crate::metrics::MetricsCollector;
use crate::types::{ChatEvent, Effect, LobbySnapshot, TimerEvent};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Work item for the engine task
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Event(ChatEvent),
    Timer(TimerEvent),
    Shutdown,
}

/// Cloneable handle for talking to a running engine task
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
    snapshot: watch::Receiver<LobbySnapshot>,
}

impl EngineHandle {
    /// Queue an inbound chat event
    pub async fn send_event(&self, event: ChatEvent) -> Result<()> {
        self.sender
            .send(EngineCommand::Event(event))
            .await
            .map_err(|_| {
                LobbyError::InternalError {
                    message: "Lobby engine task is not running".to_string(),
                }
                .into()
            })
    }

    /// Ask the engine task to stop after the commands already queued
    pub async fn shutdown(&self) {
        if self.sender.send(EngineCommand::Shutdown).await.is_err() {
            debug!("Lobby engine task already stopped");
        }
    }

    /// Latest snapshot published by the engine task
    pub fn snapshot(&self) -> LobbySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Owns the engine and executes its effects
pub struct EngineRunner {
    engine: LobbyEngine,
    directory: Arc<InMemoryDirectory>,
    publisher: Arc<dyn LobbyPublisher>,
    metrics: Arc<MetricsCollector>,
    receiver: mpsc::Receiver<EngineCommand>,
    timers: mpsc::WeakSender<EngineCommand>,
    snapshot_tx: watch::Sender<LobbySnapshot>,
}

impl EngineRunner {
    /// Build a runner and the handle that feeds it. The directory must be the
    /// same instance the engine consults for names and authorization.
    pub fn new(
        engine: LobbyEngine,
        directory: Arc<InMemoryDirectory>,
        publisher: Arc<dyn LobbyPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, EngineHandle) {
        let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(engine.snapshot(current_timestamp()));

        let runner = Self {
            engine,
            directory,
            publisher,
            metrics,
            receiver,
            timers: sender.downgrade(),
            snapshot_tx,
        };
        let handle = EngineHandle { sender, snapshot };

        (runner, handle)
    }

    /// Run on a new tokio task
    pub fn spawn(self) -> JoinHandle<LobbyEngineStats> {
        tokio::spawn(self.run())
    }

    /// Process commands until shutdown or until every handle is dropped
    pub async fn run(mut self) -> LobbyEngineStats {
        info!("Lobby engine task started");

        self.engine.refresh_channel_title();
        self.execute_effects().await;
        self.publish_snapshot();

        while let Some(command) = self.receiver.recv().await {
            match command {
                EngineCommand::Event(event) => self.handle_event(event),
                EngineCommand::Timer(timer) => self.engine.on_timer(timer, current_timestamp()),
                EngineCommand::Shutdown => {
                    info!("Lobby engine task received shutdown");
                    break;
                }
            }

            self.execute_effects().await;
            self.publish_snapshot();
        }

        let stats = self.engine.stats().clone();
        info!("Lobby engine task stopped: {:?}", stats);
        stats
    }

    fn handle_event(&mut self, event: ChatEvent) {
        if let ChatEvent::MemberUpdate(update) = &event {
            self.directory.apply_update(update);
        }

        self.engine.handle_event(&event);

        if let ChatEvent::Departed(departed) = &event {
            self.directory.forget(&departed.participant);
        }
    }

    async fn execute_effects(&mut self) {
        for effect in self.engine.drain_effects() {
            match effect {
                Effect::Publish(message) => {
                    let start = Instant::now();
                    let result = self.publisher.publish(message).await;
                    self.metrics
                        .record_amqp_operation("publish", result.is_ok(), start.elapsed());
                    if let Err(e) = result {
                        error!("Failed to publish lobby message: {}", e);
                    }
                }
                Effect::Schedule { delay, timer } => {
                    let timers = self.timers.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let Some(sender) = timers.upgrade() else {
                            debug!("Engine gone before {:?} fired", timer);
                            return;
                        };
                        if sender.send(EngineCommand::Timer(timer)).await.is_err() {
                            debug!("Engine stopped before a timer could be delivered");
                        }
                    });
                }
            }
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx
            .send_replace(self.engine.snapshot(current_timestamp()));
    }
}

/// Feeds decoded AMQP deliveries into the engine task
pub struct EngineEventForwarder {
    handle: EngineHandle,
    metrics: Arc<MetricsCollector>,
}

impl EngineEventForwarder {
    pub fn new(handle: EngineHandle, metrics: Arc<MetricsCollector>) -> Self {
        Self { handle, metrics }
    }
}

#[async_trait]
impl ChatEventHandler for EngineEventForwarder {
    async fn handle_chat_event(&self, event: ChatEvent) -> Result<()> {
        let start = Instant::now();
        let result = self.handle.send_event(event).await;
        self.metrics
            .record_amqp_operation("consume", result.is_ok(), start.elapsed());
        result
    }

    async fn handle_error(&self, error: LobbyError, message_data: &[u8]) {
        self.metrics
            .record_amqp_operation("consume", false, std::time::Duration::ZERO);

        warn!(
            "Dropping inbound message - error: '{}', size: {} bytes",
            error,
            message_data.len()
        );
        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            debug!("Message preview: {:?}", preview);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockLobbyPublisher;
    use crate::config::{LobbySettings, QueueDefinition};
    use crate::types::{ActivityEvent, MemberUpdate, Outbound, PresenceEvent};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn settings() -> LobbySettings {
        LobbySettings {
            queues: vec![
                QueueDefinition::new("duel", 2),
                QueueDefinition::new("ctf", 8),
            ],
            default_queue: "duel".to_string(),
            ..LobbySettings::default()
        }
    }

    fn start() -> (
        EngineHandle,
        JoinHandle<LobbyEngineStats>,
        Arc<MockLobbyPublisher>,
    ) {
        let directory = Arc::new(InMemoryDirectory::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let engine = LobbyEngine::with_metrics(settings(), directory.clone(), metrics.clone());
        let publisher = Arc::new(MockLobbyPublisher::new());
        let (runner, handle) = EngineRunner::new(engine, directory, publisher.clone(), metrics);
        (handle, runner.spawn(), publisher)
    }

    fn say(participant: &str, text: &str, at: DateTime<Utc>) -> ChatEvent {
        ChatEvent::Activity(ActivityEvent {
            participant: participant.to_string(),
            display_name: Some(format!("name-{}", participant)),
            text: text.to_string(),
            channel_id: None,
            message_id: None,
            timestamp: at,
        })
    }

    fn members(snapshot: &LobbySnapshot, queue: &str) -> Vec<String> {
        snapshot
            .queues
            .iter()
            .find(|q| q.name == queue)
            .map(|q| q.members.clone())
            .unwrap_or_default()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_title_published_on_start() {
        let (handle, task, publisher) = start();
        settle().await;

        assert_eq!(
            publisher.published().first(),
            Some(&Outbound::ChannelTitle {
                title: "\u{1f93c}pickup\u{ff3b}0\u{ff89}2\u{ff3d}".to_string()
            })
        );

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_member_aborts_after_rounds() {
        let (handle, task, publisher) = start();
        let now = current_timestamp();

        handle
            .send_event(say("b", "!add duel", now - chrono::Duration::minutes(20)))
            .await
            .unwrap();
        handle.send_event(say("a", "!add duel", now)).await.unwrap();

        // round 1 immediately, then three more 30s rounds
        tokio::time::sleep(Duration::from_secs(95)).await;

        let broadcasts = publisher.broadcasts();
        let warnings = broadcasts
            .iter()
            .filter(|lines| lines.iter().any(|l| l.contains("<@b>") && !l.contains("didn't")))
            .count();
        assert_eq!(warnings, 3);
        assert!(broadcasts
            .last()
            .unwrap()
            .iter()
            .any(|line| line.contains("<@b> didn't respond")));

        let snapshot = handle.snapshot();
        assert!(snapshot.pending.is_none());
        assert_eq!(members(&snapshot, "duel"), vec!["a".to_string()]);
        assert_eq!(snapshot.formations_aborted, 1);

        handle.shutdown().await;
        let stats = task.await.unwrap();
        assert_eq!(stats.formations_started, 1);
        assert_eq!(stats.formations_aborted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_completes_formation() {
        let (handle, task, publisher) = start();
        let now = current_timestamp();

        handle
            .send_event(say("b", "!add duel", now - chrono::Duration::minutes(20)))
            .await
            .unwrap();
        handle.send_event(say("a", "!add duel", now)).await.unwrap();
        settle().await;
        assert!(handle.snapshot().pending.is_some());

        handle.send_event(say("b", "here", now)).await.unwrap();
        settle().await;

        let snapshot = handle.snapshot();
        assert!(snapshot.pending.is_none());
        assert!(snapshot.queues.iter().all(|q| q.members.is_empty()));
        assert!(publisher
            .published()
            .contains(&Outbound::NotifyReady {
                participant: "b".to_string(),
                message_id: None
            }));

        // the leftover round timer is stale and changes nothing
        tokio::time::sleep(Duration::from_secs(40)).await;
        handle.shutdown().await;
        let stats = task.await.unwrap();
        assert_eq!(stats.formations_completed, 1);
        assert_eq!(stats.stale_callbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_removal_and_return() {
        let (handle, task, publisher) = start();
        let now = current_timestamp();

        handle.send_event(say("a", "!add ctf", now)).await.unwrap();
        handle.send_event(say("b", "!add ctf", now)).await.unwrap();
        handle
            .send_event(ChatEvent::Presence(PresenceEvent {
                participant: "a".to_string(),
                online: false,
                timestamp: now,
            }))
            .await
            .unwrap();
        handle
            .send_event(ChatEvent::Presence(PresenceEvent {
                participant: "b".to_string(),
                online: false,
                timestamp: now,
            }))
            .await
            .unwrap();
        // b speaks before the grace period ends and keeps their spot
        handle.send_event(say("b", "back", now)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let snapshot = handle.snapshot();
        assert_eq!(members(&snapshot, "ctf"), vec!["b".to_string()]);
        assert!(publisher
            .broadcasts()
            .iter()
            .any(|lines| lines[0] == "name-a went offline and was removed"));

        handle.shutdown().await;
        let stats = task.await.unwrap();
        assert_eq!(stats.stale_callbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_updates_feed_directory() {
        let directory = Arc::new(InMemoryDirectory::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let engine = LobbyEngine::with_metrics(settings(), directory.clone(), metrics.clone());
        let publisher = Arc::new(MockLobbyPublisher::new());
        let (runner, handle) =
            EngineRunner::new(engine, directory.clone(), publisher.clone(), metrics);
        let task = runner.spawn();

        handle
            .send_event(ChatEvent::MemberUpdate(MemberUpdate {
                participant: "op".to_string(),
                display_name: Some("Operator".to_string()),
                operator: true,
            }))
            .await
            .unwrap();
        handle
            .send_event(say("op", "!pickuproles", current_timestamp()))
            .await
            .unwrap();
        settle().await;

        assert_eq!(directory.len(), 1);
        assert!(publisher.published().contains(&Outbound::RoleIdentity {
            requested_by: "op".to_string()
        }));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_engine() {
        let (handle, task, _publisher) = start();
        handle.shutdown().await;
        task.await.unwrap();

        assert!(!handle.is_alive());
        assert!(handle
            .send_event(say("a", "!add", current_timestamp()))
            .await
            .is_err());
    }
}
