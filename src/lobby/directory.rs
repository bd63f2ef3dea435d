//! Identity collaborator: display names and operator authorization
//!
//! The engine never inspects roles itself. It asks a [`Directory`] whether a
//! participant is authorized and what they are currently called.

use crate::types::{MemberUpdate, ParticipantId};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Live lookup of participant identity
#[cfg_attr(test, mockall::automock)]
pub trait Directory: Send + Sync {
    /// Current display name, or `None` if the participant cannot be resolved
    fn resolve_display_name(&self, participant: &str) -> Option<String>;

    /// Whether the participant may run operator commands
    fn is_authorized(&self, participant: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
struct MemberRecord {
    display_name: Option<String>,
    operator: bool,
}

/// Directory fed by member updates from the chat gateway
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    members: RwLock<HashMap<ParticipantId, MemberRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member record
    pub fn apply_update(&self, update: &MemberUpdate) {
        match self.members.write() {
            Ok(mut members) => {
                debug!(
                    "Directory update - participant: '{}', operator: {}",
                    update.participant, update.operator
                );
                members.insert(
                    update.participant.clone(),
                    MemberRecord {
                        display_name: update.display_name.clone(),
                        operator: update.operator,
                    },
                );
            }
            Err(_) => warn!("Failed to acquire directory lock for update"),
        }
    }

    /// Drop a member who left the server
    pub fn forget(&self, participant: &str) {
        if let Ok(mut members) = self.members.write() {
            members.remove(participant);
        }
    }

    pub fn len(&self) -> usize {
        self.members.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for InMemoryDirectory {
    fn resolve_display_name(&self, participant: &str) -> Option<String> {
        self.members
            .read()
            .ok()?
            .get(participant)
            .and_then(|record| record.display_name.clone())
    }

    fn is_authorized(&self, participant: &str) -> bool {
        self.members
            .read()
            .map(|members| {
                members
                    .get(participant)
                    .map(|record| record.operator)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str, name: Option<&str>, operator: bool) -> MemberUpdate {
        MemberUpdate {
            participant: id.to_string(),
            display_name: name.map(str::to_string),
            operator,
        }
    }

    #[test]
    fn test_in_memory_directory() {
        let directory = InMemoryDirectory::new();
        assert!(directory.is_empty());

        directory.apply_update(&update("1", Some("Alice"), true));
        directory.apply_update(&update("2", None, false));

        assert_eq!(directory.resolve_display_name("1").as_deref(), Some("Alice"));
        assert_eq!(directory.resolve_display_name("2"), None);
        assert!(directory.is_authorized("1"));
        assert!(!directory.is_authorized("2"));
        assert!(!directory.is_authorized("3"));

        directory.forget("1");
        assert_eq!(directory.resolve_display_name("1"), None);
        assert!(!directory.is_authorized("1"));
        assert_eq!(directory.len(), 1);
    }
}
