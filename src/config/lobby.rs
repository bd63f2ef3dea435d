//! Lobby configuration: queue definitions and formation timing

use crate::error::{LobbyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Longest accepted inactivity threshold: one year
pub const MAX_AFK_THRESHOLD_SECONDS: u64 = 365 * 24 * 60 * 60;

/// A named queue and the number of participants it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    pub required: usize,
}

impl QueueDefinition {
    pub fn new(name: impl Into<String>, required: usize) -> Self {
        Self {
            name: name.into(),
            required,
        }
    }
}

/// Formation and membership settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    /// Queues in configuration order
    pub queues: Vec<QueueDefinition>,
    /// Queue used when a join names no queue
    pub default_queue: String,
    /// Only messages from this channel run commands; all channels count as activity
    pub pickup_channel: Option<String>,
    /// Members quieter than this when their queue fills must confirm
    pub afk_threshold_seconds: u64,
    /// Delay between confirmation rounds
    pub confirmation_delay_seconds: u64,
    /// Rounds before unresponsive members are removed
    pub max_confirmation_rounds: u32,
    /// Grace period before an offline participant is removed
    pub offline_removal_delay_seconds: u64,
    /// Emoji framing the "game formed" announcement
    pub formed_emoji: String,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            queues: vec![
                QueueDefinition::new("duel", 2),
                QueueDefinition::new("ctf", 8),
                QueueDefinition::new("ffa", 6),
            ],
            default_queue: "ctf".to_string(),
            pickup_channel: None,
            afk_threshold_seconds: 600, // 10 minutes
            confirmation_delay_seconds: 30,
            max_confirmation_rounds: 4,
            offline_removal_delay_seconds: 5,
            formed_emoji: "\u{1f3ae}".to_string(),
        }
    }
}

impl LobbySettings {
    /// Inactivity threshold as a chrono duration, for comparing against last-seen.
    /// Values above [`MAX_AFK_THRESHOLD_SECONDS`] are clamped to it.
    pub fn afk_threshold(&self) -> chrono::Duration {
        let seconds = self.afk_threshold_seconds.min(MAX_AFK_THRESHOLD_SECONDS);
        i64::try_from(seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Get confirmation round delay as Duration
    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_secs(self.confirmation_delay_seconds)
    }

    /// Get offline removal delay as Duration
    pub fn offline_removal_delay(&self) -> Duration {
        Duration::from_secs(self.offline_removal_delay_seconds)
    }

    /// Parse a `name:size,name:size` queue list
    pub fn parse_queue_list(value: &str) -> Result<Vec<QueueDefinition>> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, required) =
                    entry
                        .split_once(':')
                        .ok_or_else(|| LobbyError::ConfigurationError {
                            message: format!("Queue entry '{}' must look like name:size", entry),
                        })?;
                let required =
                    required
                        .trim()
                        .parse()
                        .map_err(|_| LobbyError::ConfigurationError {
                            message: format!("Invalid size for queue '{}': {}", name, required),
                        })?;
                Ok(QueueDefinition::new(name.trim(), required))
            })
            .collect()
    }

    /// Validate lobby settings
    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(config_error("At least one queue must be configured"));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.name.is_empty() {
                return Err(config_error("Queue names cannot be empty"));
            }
            if queue.name.chars().any(char::is_whitespace) {
                return Err(config_error(&format!(
                    "Queue name '{}' cannot contain whitespace",
                    queue.name
                )));
            }
            // Commands are matched lower-cased
            if queue.name != queue.name.to_lowercase() {
                return Err(config_error(&format!(
                    "Queue name '{}' must be lower case",
                    queue.name
                )));
            }
            if queue.required == 0 {
                return Err(config_error(&format!(
                    "Queue '{}' must require at least one participant",
                    queue.name
                )));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(config_error(&format!(
                    "Queue '{}' is defined twice",
                    queue.name
                )));
            }
        }

        if !seen.contains(self.default_queue.as_str()) {
            return Err(config_error(&format!(
                "Default queue '{}' is not a configured queue",
                self.default_queue
            )));
        }

        if self.afk_threshold_seconds > MAX_AFK_THRESHOLD_SECONDS {
            return Err(config_error(&format!(
                "AFK threshold {}s exceeds the maximum of {}s",
                self.afk_threshold_seconds, MAX_AFK_THRESHOLD_SECONDS
            )));
        }

        if self.max_confirmation_rounds == 0 {
            return Err(config_error("Max confirmation rounds must be at least 1"));
        }

        Ok(())
    }
}

fn config_error(message: &str) -> anyhow::Error {
    LobbyError::ConfigurationError {
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(LobbySettings::default().validate().is_ok());
    }

    #[test]
    fn test_parse_queue_list() {
        let queues = LobbySettings::parse_queue_list("duel:2, ctf:8,").unwrap();
        assert_eq!(
            queues,
            vec![QueueDefinition::new("duel", 2), QueueDefinition::new("ctf", 8)]
        );

        assert!(LobbySettings::parse_queue_list("duel").is_err());
        assert!(LobbySettings::parse_queue_list("duel:two").is_err());
    }

    #[test]
    fn test_validation_rejects_bad_queues() {
        let mut settings = LobbySettings::default();
        settings.queues.push(QueueDefinition::new("duel", 2));
        assert!(settings.validate().is_err());

        let mut settings = LobbySettings::default();
        settings.queues[0].required = 0;
        assert!(settings.validate().is_err());

        let mut settings = LobbySettings::default();
        settings.queues[0].name = "Duel".to_string();
        assert!(settings.validate().is_err());

        let mut settings = LobbySettings::default();
        settings.default_queue = "missing".to_string();
        assert!(settings.validate().is_err());

        let mut settings = LobbySettings::default();
        settings.max_confirmation_rounds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_afk_threshold_is_capped() {
        let mut settings = LobbySettings::default();
        settings.afk_threshold_seconds = MAX_AFK_THRESHOLD_SECONDS;
        assert!(settings.validate().is_ok());

        settings.afk_threshold_seconds = MAX_AFK_THRESHOLD_SECONDS + 1;
        assert!(settings.validate().is_err());

        // out-of-range values never reach chrono unclamped
        for seconds in [20_000_000_000_000_000, 10_000_000_000_000, u64::MAX] {
            settings.afk_threshold_seconds = seconds;
            assert_eq!(
                settings.afk_threshold(),
                chrono::Duration::seconds(MAX_AFK_THRESHOLD_SECONDS as i64)
            );
        }
    }
}
