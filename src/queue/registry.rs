//! Named queues with a required size and an ordered member list

use crate::config::QueueDefinition;
use crate::error::LobbyError;
use crate::types::{ParticipantId, QueueName, QueueSnapshot};
use std::collections::BTreeMap;

/// A named pool of participants waiting for an activity of fixed size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    name: QueueName,
    required: usize,
    /// Insertion order is display order
    members: Vec<ParticipantId>,
}

impl Queue {
    pub fn new(name: impl Into<QueueName>, required: usize) -> Self {
        Self {
            name: name.into(),
            required,
            members: Vec::with_capacity(required),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.required
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.members.iter().any(|m| m == participant)
    }

    /// Append a participant. Returns `true` when this append filled the queue.
    pub fn add_member(&mut self, participant: &str) -> Result<bool, LobbyError> {
        if self.contains(participant) {
            return Err(LobbyError::AlreadyQueued {
                participant: participant.to_string(),
                queue: self.name.clone(),
            });
        }
        if self.is_full() {
            return Err(LobbyError::QueueFull {
                queue: self.name.clone(),
            });
        }

        self.members.push(participant.to_string());
        Ok(self.members.len() == self.required)
    }

    /// Remove a participant, preserving the order of everyone else
    pub fn remove_member(&mut self, participant: &str) -> Result<(), LobbyError> {
        let idx = self
            .members
            .iter()
            .position(|m| m == participant)
            .ok_or_else(|| LobbyError::NotQueued {
                participant: participant.to_string(),
                queue: self.name.clone(),
            })?;
        self.members.remove(idx);
        Ok(())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.name.clone(),
            required: self.required,
            members: self.members.clone(),
        }
    }
}

/// The fixed set of configured queues
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    queues: BTreeMap<QueueName, Queue>,
}

impl QueueRegistry {
    /// Build a registry from queue definitions
    pub fn new(definitions: &[QueueDefinition]) -> Self {
        let queues = definitions
            .iter()
            .map(|def| (def.name.clone(), Queue::new(def.name.clone(), def.required)))
            .collect();
        Self { queues }
    }

    /// Look up a queue; unknown names are a filter miss for callers
    pub fn get(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    /// Add a participant to a queue. Returns `true` when the queue just filled.
    pub fn add(&mut self, queue: &str, participant: &str) -> Result<bool, LobbyError> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| LobbyError::QueueNotFound {
                name: queue.to_string(),
            })?
            .add_member(participant)
    }

    /// Remove a participant from one queue
    pub fn remove(&mut self, queue: &str, participant: &str) -> Result<(), LobbyError> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| LobbyError::QueueNotFound {
                name: queue.to_string(),
            })?
            .remove_member(participant)
    }

    /// Remove a participant from every queue, returning the queues they left
    pub fn remove_everywhere(&mut self, participant: &str) -> Vec<QueueName> {
        self.queues
            .values_mut()
            .filter_map(|queue| {
                queue
                    .remove_member(participant)
                    .ok()
                    .map(|_| queue.name.clone())
            })
            .collect()
    }

    /// Names of every queue the participant is in
    pub fn queues_containing(&self, participant: &str) -> Vec<QueueName> {
        self.queues
            .values()
            .filter(|queue| queue.contains(participant))
            .map(|queue| queue.name.clone())
            .collect()
    }

    /// Queues ordered by member count, fullest first; ties by name
    pub fn snapshot_ordered_by_fullness(&self) -> Vec<&Queue> {
        let mut queues: Vec<&Queue> = self.queues.values().collect();
        queues.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.name.cmp(&b.name)));
        queues
    }

    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    pub fn snapshot(&self) -> Vec<QueueSnapshot> {
        self.queues.values().map(Queue::snapshot).collect()
    }
}
