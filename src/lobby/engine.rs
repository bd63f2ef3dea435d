//! Lobby engine: membership, formation and cascade removal
//!
//! The engine is synchronous and owns every piece of mutable lobby state.
//! Each entry point mutates that state and appends [`Effect`]s to an outbox
//! which the host drains and executes. Delayed work is requested with
//! [`Effect::Schedule`] and comes back through [`LobbyEngine::on_timer`];
//! timers are never cancelled, so every timer carries a generation token and
//! is ignored when the token no longer matches.

use crate::config::LobbySettings;
use crate::error::LobbyError;
use crate::lobby::commands::{self, Command};
use crate::lobby::confirmation::{
    ConfirmationState, FormationOutcome, PendingFormation, RoundDecision,
};
use crate::lobby::directory::Directory;
use crate::lobby::inactivity::InactivityTracker;
use crate::lobby::status;
use crate::metrics::MetricsCollector;
use crate::queue::QueueRegistry;
use crate::types::{
    ActivityEvent, ChatEvent, Effect, GenerationToken, LobbySnapshot, Outbound, ParticipantId,
    QueueName, TimerEvent,
};
use crate::utils::TokenIssuer;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A formation is pending; nothing changed
    Rejected,
    /// Every named queue was unknown or already contained the participant
    Unchanged,
    /// At least one queue gained the participant
    Added,
    /// A queue filled and a formation started
    Filled,
}

/// Why a participant was swept out of every queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Left,
    Offline,
    Departed,
    Operator,
    Unresponsive,
    Formed,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Left => "left",
            RemovalReason::Offline => "offline",
            RemovalReason::Departed => "departed",
            RemovalReason::Operator => "operator",
            RemovalReason::Unresponsive => "unresponsive",
            RemovalReason::Formed => "formed",
        }
    }
}

/// Counters kept by the engine for snapshots
#[derive(Debug, Clone, Default)]
pub struct LobbyEngineStats {
    pub events_processed: u64,
    pub formations_started: u64,
    pub formations_completed: u64,
    pub formations_aborted: u64,
    pub stale_callbacks: u64,
}

/// Single owner of queues, the pending formation and inactivity state
pub struct LobbyEngine {
    settings: LobbySettings,
    registry: QueueRegistry,
    /// At most one formation system-wide
    pending: Option<PendingFormation>,
    tracker: InactivityTracker,
    tokens: TokenIssuer,
    directory: Arc<dyn Directory>,
    metrics: Arc<MetricsCollector>,
    stats: LobbyEngineStats,
    /// Last channel title handed to the transport
    published_title: Option<String>,
    outbox: Vec<Effect>,
}

impl LobbyEngine {
    /// Create a new engine
    pub fn new(settings: LobbySettings, directory: Arc<dyn Directory>) -> Self {
        let metrics = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(settings, directory, metrics)
    }

    /// Create a new engine reporting into an existing metrics collector
    pub fn with_metrics(
        settings: LobbySettings,
        directory: Arc<dyn Directory>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let registry = QueueRegistry::new(&settings.queues);
        let tracker = InactivityTracker::new(settings.afk_threshold());

        for queue in registry.iter() {
            metrics
                .lobby()
                .queue_members
                .with_label_values(&[queue.name()])
                .set(0);
        }

        Self {
            settings,
            registry,
            pending: None,
            tracker,
            tokens: TokenIssuer::new(),
            directory,
            metrics,
            stats: LobbyEngineStats::default(),
            published_title: None,
            outbox: Vec::new(),
        }
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &InactivityTracker {
        &self.tracker
    }

    pub fn pending(&self) -> Option<&PendingFormation> {
        self.pending.as_ref()
    }

    pub fn stats(&self) -> &LobbyEngineStats {
        &self.stats
    }

    pub fn state(&self) -> ConfirmationState {
        match &self.pending {
            Some(pending) => ConfirmationState::AwaitingConfirmation {
                queue: pending.queue().to_string(),
                attempt: pending.attempt(),
            },
            None => ConfirmationState::Idle,
        }
    }

    /// Point-in-time view for monitoring
    pub fn snapshot(&self, now: DateTime<Utc>) -> LobbySnapshot {
        LobbySnapshot {
            queues: self.registry.snapshot(),
            pending: self.pending.as_ref().map(PendingFormation::snapshot),
            formations_started: self.stats.formations_started,
            formations_completed: self.stats.formations_completed,
            formations_aborted: self.stats.formations_aborted,
            taken_at: Some(now),
        }
    }

    /// Hand every queued effect to the caller
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.outbox)
    }

    /// Dispatch one inbound chat event
    pub fn handle_event(&mut self, event: &ChatEvent) {
        let timer = self.metrics.start_timer();
        self.stats.events_processed += 1;

        let kind = match event {
            ChatEvent::Activity(activity) => {
                let authorized = activity.text.trim_start().starts_with('!')
                    && self.directory.is_authorized(&activity.participant);
                self.on_activity(activity, authorized);
                "activity"
            }
            ChatEvent::Presence(presence) => {
                self.on_presence(&presence.participant, presence.online, presence.timestamp);
                "presence"
            }
            ChatEvent::Departed(departed) => {
                self.on_departed(&departed.participant, departed.display_name.as_deref());
                "departed"
            }
            ChatEvent::MemberUpdate(update) => {
                if let Some(name) = &update.display_name {
                    self.tracker.remember_name(&update.participant, name);
                }
                "member_update"
            }
        };

        self.metrics.record_event_handled(kind, timer.stop());
    }

    /// A message was observed. Activity always counts towards last-seen;
    /// only messages in the pickup channel clear AFK candidates or run commands.
    pub fn on_activity(&mut self, event: &ActivityEvent, authorized: bool) {
        let now = event.timestamp;
        self.tracker
            .touch(&event.participant, event.display_name.as_deref(), now);

        if let Some(channel) = &self.settings.pickup_channel {
            if event.channel_id.as_deref() != Some(channel.as_str()) {
                debug!(
                    "Ignoring message from '{}' outside the pickup channel",
                    event.participant
                );
                return;
            }
        }

        self.confirm_present(&event.participant, event.message_id.clone());

        if let Some(command) = commands::parse(&event.text, authorized) {
            debug!("Command from '{}': {:?}", event.participant, command);
            self.route(command, event, now);
        }

        self.flush_channel_title();
    }

    /// Presence changed. Going offline makes the participant AFK-eligible at
    /// once and schedules their removal unless they come back first.
    pub fn on_presence(&mut self, participant: &str, online: bool, now: DateTime<Utc>) {
        if online {
            self.tracker.mark_online(participant);
            return;
        }

        let token = self.tokens.issue();
        self.tracker.mark_offline(participant, now, token);
        debug!(
            "'{}' went offline, removal scheduled with {}",
            participant, token
        );
        self.schedule(
            self.settings.offline_removal_delay(),
            TimerEvent::OfflineRemoval {
                participant: participant.to_string(),
                token,
            },
        );
    }

    /// Participant left the server. Runs in every state.
    pub fn on_departed(&mut self, participant: &str, display_name: Option<&str>) {
        if self.remove_from_all(participant, RemovalReason::Departed) {
            let name = display_name
                .map(str::to_string)
                .unwrap_or_else(|| self.display_name(participant));
            info!("'{}' left the server and was removed", participant);
            self.broadcast(vec![
                format!("{} left the server and was removed", name),
                status::brief_status(&self.registry),
            ]);
        }
        self.flush_channel_title();
    }

    /// A previously scheduled timer fired
    pub fn on_timer(&mut self, timer: TimerEvent, now: DateTime<Utc>) {
        let started = self.metrics.start_timer();

        match timer {
            TimerEvent::ConfirmationRound { token, attempt } => {
                debug!("Confirmation round {} fired with {}", attempt, token);
                self.run_round(token, attempt);
            }
            TimerEvent::OfflineRemoval { participant, token } => {
                if !self.tracker.claim_offline_token(&participant, token) {
                    self.record_stale("offline_removal");
                    debug!(
                        "Ignoring stale offline removal for '{}' ({})",
                        participant, token
                    );
                } else if self.remove_from_all(&participant, RemovalReason::Offline) {
                    info!(
                        "'{}' went offline and was removed at {}",
                        participant, now
                    );
                    let name = self.display_name(&participant);
                    self.broadcast(vec![
                        format!("{} went offline and was removed", name),
                        status::brief_status(&self.registry),
                    ]);
                }
            }
        }

        self.flush_channel_title();
        self.metrics.record_event_handled("timer", started.stop());
    }

    /// Add a participant to the named queues, or to the default queue when
    /// none are named. The first queue to fill starts a formation and ends
    /// the call.
    pub fn join(
        &mut self,
        participant: &str,
        queues: &[QueueName],
        now: DateTime<Utc>,
    ) -> JoinOutcome {
        if let Some(pending) = &self.pending {
            debug!(
                "Join from '{}' rejected: {}",
                participant,
                LobbyError::FormationPending {
                    queue: pending.queue().to_string()
                }
            );
            return JoinOutcome::Rejected;
        }

        let names = if queues.is_empty() {
            vec![self.settings.default_queue.clone()]
        } else {
            dedup(queues)
        };

        let mut added = false;
        for name in &names {
            match self.registry.add(name, participant) {
                Ok(filled) => {
                    added = true;
                    self.record_change(name, "join");
                    debug!("'{}' joined '{}'", participant, name);
                    if filled {
                        self.start_formation(name, now);
                        self.flush_channel_title();
                        return JoinOutcome::Filled;
                    }
                }
                Err(e) if e.is_validation_miss() => {
                    debug!("Skipping join for '{}': {}", participant, e)
                }
                Err(e) => warn!("Join for '{}' failed: {}", participant, e),
            }
        }

        self.flush_channel_title();
        if added {
            JoinOutcome::Added
        } else {
            JoinOutcome::Unchanged
        }
    }

    /// Remove a participant from the named queues, or from every queue when
    /// none are named. Returns whether anything was removed.
    pub fn leave(&mut self, participant: &str, queues: &[QueueName]) -> bool {
        if let Some(pending) = &self.pending {
            debug!(
                "Leave from '{}' rejected: {}",
                participant,
                LobbyError::FormationPending {
                    queue: pending.queue().to_string()
                }
            );
            return false;
        }

        let removed = if queues.is_empty() {
            self.remove_from_all(participant, RemovalReason::Left)
        } else {
            let mut removed = false;
            for name in dedup(queues) {
                match self.registry.remove(&name, participant) {
                    Ok(()) => {
                        removed = true;
                        self.record_change(&name, "leave");
                    }
                    Err(e) if e.is_validation_miss() => {
                        debug!("Skipping leave for '{}': {}", participant, e)
                    }
                    Err(e) => warn!("Leave for '{}' failed: {}", participant, e),
                }
            }
            removed
        };

        self.flush_channel_title();
        removed
    }

    /// Remove a participant from every queue regardless of formation state
    pub fn leave_all(&mut self, participant: &str) -> bool {
        let removed = self.remove_from_all(participant, RemovalReason::Left);
        self.flush_channel_title();
        removed
    }

    /// Operator removal. Reports a miss instead of staying silent.
    pub fn force_remove(&mut self, participant: &str) -> bool {
        let removed = self.remove_from_all(participant, RemovalReason::Operator);
        if removed {
            info!("Operator removed '{}' from every queue", participant);
            self.broadcast(vec![status::brief_status(&self.registry)]);
        } else {
            self.broadcast(vec!["they aren't added".to_string()]);
        }
        self.flush_channel_title();
        removed
    }

    /// Publish the channel title if it differs from the last one sent
    pub fn refresh_channel_title(&mut self) {
        self.flush_channel_title();
    }

    fn route(&mut self, command: Command, event: &ActivityEvent, now: DateTime<Utc>) {
        let participant = event.participant.as_str();
        match command {
            Command::Join(queues) => {
                if self.join(participant, &queues, now) == JoinOutcome::Added {
                    self.broadcast(vec![status::brief_status(&self.registry)]);
                }
            }
            Command::Leave(queues) => {
                if self.leave(participant, &queues) {
                    self.broadcast(vec![status::brief_status(&self.registry)]);
                }
            }
            Command::Status => {
                let directory = self.directory.as_ref();
                let tracker = &self.tracker;
                let resolve = |id: &str| status::resolve_name(directory, tracker, id);
                let lines = status::full_status(&self.registry, &resolve);
                self.broadcast(lines);
            }
            Command::ForceRemove(target) => {
                self.force_remove(&target);
            }
            Command::ChannelIdentity => {
                info!(
                    "Pickup channel requested by '{}': {:?}",
                    participant, event.channel_id
                );
                self.publish(Outbound::ChannelIdentity {
                    channel_id: event.channel_id.clone(),
                });
            }
            Command::RoleIdentity => {
                info!("Operator role requested by '{}'", participant);
                self.publish(Outbound::RoleIdentity {
                    requested_by: participant.to_string(),
                });
            }
        }
    }

    /// Clear a pending candidate who showed signs of life
    fn confirm_present(&mut self, participant: &str, message_id: Option<String>) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if !pending.confirm(participant) {
            return;
        }
        let confirmed = pending.is_confirmed();

        debug!("'{}' is no longer AFK", participant);
        self.publish(Outbound::NotifyReady {
            participant: participant.to_string(),
            message_id,
        });

        if confirmed {
            self.complete_formation();
        }
    }

    fn start_formation(&mut self, queue: &str, now: DateTime<Utc>) {
        let members = self
            .registry
            .get(queue)
            .map(|q| q.members().to_vec())
            .unwrap_or_default();
        let candidates = self.tracker.afk_candidates(&members, now);
        let token = self.tokens.issue();

        info!(
            "Queue '{}' filled with {} members, {} AFK candidates ({})",
            queue,
            members.len(),
            candidates.len(),
            token
        );

        self.stats.formations_started += 1;
        self.metrics.record_formation_started(queue);
        self.pending = Some(PendingFormation::new(
            queue.to_string(),
            token,
            candidates,
            now,
        ));
        self.run_round(token, 1);
    }

    fn run_round(&mut self, token: GenerationToken, attempt: u32) {
        let decision = match &self.pending {
            Some(pending) => {
                pending.evaluate(token, attempt, self.settings.max_confirmation_rounds)
            }
            None => RoundDecision::Stale,
        };

        match decision {
            RoundDecision::Stale => {
                self.record_stale("confirmation");
                debug!(
                    "Ignoring stale confirmation round {} ({})",
                    attempt, token
                );
            }
            RoundDecision::Form => self.complete_formation(),
            RoundDecision::Abort { candidates } => self.abort_formation(candidates),
            RoundDecision::Remind { candidates } => {
                self.broadcast(status::afk_warning(&candidates));
                let attempt = match self.pending.as_mut() {
                    Some(pending) => pending.advance(),
                    None => return,
                };
                self.metrics.record_confirmation_round();
                debug!(
                    "Reminded {} AFK candidates, round {} scheduled",
                    candidates.len(),
                    attempt
                );
                self.schedule(
                    self.settings.confirmation_delay(),
                    TimerEvent::ConfirmationRound { token, attempt },
                );
            }
        }
    }

    fn complete_formation(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let members = self
            .registry
            .get(pending.queue())
            .map(|q| q.members().to_vec())
            .unwrap_or_default();

        info!(
            "Formation for '{}' complete after {} rounds: {:?}",
            pending.queue(),
            pending.attempt(),
            members
        );

        let lines = status::formed_announcement(&self.settings.formed_emoji, &members);
        self.broadcast(lines);

        for member in &members {
            self.remove_from_all(member, RemovalReason::Formed);
        }

        self.stats.formations_completed += 1;
        self.metrics
            .record_formation_resolved(pending.queue(), FormationOutcome::Formed.as_str());
    }

    fn abort_formation(&mut self, candidates: Vec<ParticipantId>) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        info!(
            "Formation for '{}' aborted, unresponsive: {:?}",
            pending.queue(),
            candidates
        );

        for candidate in &candidates {
            self.remove_from_all(candidate, RemovalReason::Unresponsive);
        }

        let brief = status::brief_status(&self.registry);
        self.broadcast(status::aborted_announcement(&candidates, brief));

        self.stats.formations_aborted += 1;
        self.metrics
            .record_formation_resolved(pending.queue(), FormationOutcome::Aborted.as_str());
    }

    fn remove_from_all(&mut self, participant: &str, reason: RemovalReason) -> bool {
        let left = self.registry.remove_everywhere(participant);
        for queue in &left {
            self.record_change(queue, "leave");
        }

        if left.is_empty() {
            debug!("'{}' is not in any queue", participant);
            return false;
        }

        debug!(
            "Removed '{}' from {:?} ({})",
            participant,
            left,
            reason.as_str()
        );
        self.metrics.record_removal(reason.as_str());
        true
    }

    fn record_change(&self, queue: &str, direction: &str) {
        let members = self.registry.get(queue).map(|q| q.len()).unwrap_or(0);
        self.metrics
            .record_membership_change(queue, direction, members);
    }

    fn record_stale(&mut self, kind: &str) {
        self.stats.stale_callbacks += 1;
        self.metrics.record_stale_callback(kind);
    }

    fn flush_channel_title(&mut self) {
        let Some(queue) = self.registry.get(&self.settings.default_queue) else {
            return;
        };
        let title = status::channel_title(queue);
        if self.published_title.as_deref() != Some(title.as_str()) {
            self.published_title = Some(title.clone());
            self.publish(Outbound::ChannelTitle { title });
        }
    }

    fn display_name(&self, participant: &str) -> String {
        status::resolve_name(self.directory.as_ref(), &self.tracker, participant)
    }

    fn broadcast(&mut self, lines: Vec<String>) {
        self.publish(Outbound::Broadcast { lines });
    }

    fn publish(&mut self, outbound: Outbound) {
        self.outbox.push(Effect::Publish(outbound));
    }

    fn schedule(&mut self, delay: std::time::Duration, timer: TimerEvent) {
        self.outbox.push(Effect::Schedule { delay, timer });
    }
}

/// Keep the first occurrence of each name, preserving caller order
fn dedup(names: &[QueueName]) -> Vec<QueueName> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(name) {
            seen.push(name.clone());
        }
    }
    seen
}
