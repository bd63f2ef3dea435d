//! Last-seen tracking and offline-removal bookkeeping

use crate::types::{GenerationToken, ParticipantId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Records when each participant was last active and which offline-removal
/// timer, if any, is still live for them.
#[derive(Debug, Clone)]
pub struct InactivityTracker {
    threshold: Duration,
    last_seen: HashMap<ParticipantId, DateTime<Utc>>,
    last_name: HashMap<ParticipantId, String>,
    offline_tokens: HashMap<ParticipantId, GenerationToken>,
}

impl InactivityTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_seen: HashMap::new(),
            last_name: HashMap::new(),
            offline_tokens: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Record activity. Any pending offline removal for the participant is void.
    pub fn touch(&mut self, participant: &str, display_name: Option<&str>, at: DateTime<Utc>) {
        self.last_seen.insert(participant.to_string(), at);
        if let Some(name) = display_name {
            self.remember_name(participant, name);
        }
        if self.offline_tokens.remove(participant).is_some() {
            debug!(
                "Activity from '{}' voided pending offline removal",
                participant
            );
        }
    }

    /// Cache the last known display name
    pub fn remember_name(&mut self, participant: &str, name: &str) {
        self.last_name
            .insert(participant.to_string(), name.to_string());
    }

    /// Make the participant AFK-eligible immediately and arm `token` as their
    /// live offline-removal timer
    pub fn mark_offline(&mut self, participant: &str, now: DateTime<Utc>, token: GenerationToken) {
        let stale = now
            .checked_sub_signed(self.threshold)
            .and_then(|t| t.checked_sub_signed(Duration::seconds(1)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.last_seen.insert(participant.to_string(), stale);
        self.offline_tokens.insert(participant.to_string(), token);
    }

    /// Invalidate any outstanding offline-removal timer. Last-seen is untouched.
    pub fn mark_online(&mut self, participant: &str) {
        self.offline_tokens.remove(participant);
    }

    /// Consume the participant's offline token if it is still `token`
    pub fn claim_offline_token(&mut self, participant: &str, token: GenerationToken) -> bool {
        match self.offline_tokens.get(participant) {
            Some(live) if *live == token => {
                self.offline_tokens.remove(participant);
                true
            }
            _ => false,
        }
    }

    pub fn has_pending_offline_removal(&self, participant: &str) -> bool {
        self.offline_tokens.contains_key(participant)
    }

    pub fn last_seen(&self, participant: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(participant).copied()
    }

    pub fn last_name(&self, participant: &str) -> Option<&str> {
        self.last_name.get(participant).map(String::as_str)
    }

    /// Whether the participant has been quiet longer than the threshold.
    /// Participants never seen are not considered inactive.
    pub fn is_inactive(&self, participant: &str, now: DateTime<Utc>) -> bool {
        self.last_seen
            .get(participant)
            .map(|seen| now - *seen > self.threshold)
            .unwrap_or(false)
    }

    /// The inactive subset of `members`, in member order
    pub fn afk_candidates(&self, members: &[ParticipantId], now: DateTime<Utc>) -> Vec<ParticipantId> {
        members
            .iter()
            .filter(|member| self.is_inactive(member, now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::TokenIssuer;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_inactivity_measured_against_given_time() {
        let mut tracker = InactivityTracker::new(Duration::minutes(10));
        tracker.touch("a", Some("Alice"), now() - Duration::minutes(11));
        tracker.touch("b", None, now() - Duration::minutes(9));

        assert!(tracker.is_inactive("a", now()));
        assert!(!tracker.is_inactive("b", now()));
        assert!(!tracker.is_inactive("never-seen", now()));

        let members = vec!["b".to_string(), "a".to_string()];
        assert_eq!(tracker.afk_candidates(&members, now()), vec!["a"]);
        assert_eq!(tracker.last_name("a"), Some("Alice"));
    }

    #[test]
    fn test_exact_threshold_is_not_inactive() {
        let mut tracker = InactivityTracker::new(Duration::minutes(10));
        tracker.touch("a", None, now() - Duration::minutes(10));
        assert!(!tracker.is_inactive("a", now()));
    }

    #[test]
    fn test_mark_offline_makes_participant_inactive() {
        let mut issuer = TokenIssuer::new();
        let mut tracker = InactivityTracker::new(Duration::minutes(10));
        tracker.touch("a", None, now());

        let token = issuer.issue();
        tracker.mark_offline("a", now(), token);

        assert!(tracker.is_inactive("a", now()));
        assert!(tracker.has_pending_offline_removal("a"));
    }

    #[test]
    fn test_mark_offline_with_extreme_threshold() {
        let mut issuer = TokenIssuer::new();

        let mut tracker = InactivityTracker::new(Duration::days(365));
        tracker.mark_offline("a", now(), issuer.issue());
        assert!(tracker.is_inactive("a", now()));

        // clamps to the earliest representable time instead of overflowing
        let mut tracker = InactivityTracker::new(Duration::MAX);
        let token = issuer.issue();
        tracker.mark_offline("a", now(), token);
        assert_eq!(tracker.last_seen("a"), Some(DateTime::<Utc>::MIN_UTC));
        assert!(tracker.claim_offline_token("a", token));
    }

    #[test]
    fn test_offline_token_supersession() {
        let mut issuer = TokenIssuer::new();
        let mut tracker = InactivityTracker::new(Duration::minutes(10));

        let first = issuer.issue();
        tracker.mark_offline("a", now(), first);
        let second = issuer.issue();
        tracker.mark_offline("a", now(), second);

        assert!(!tracker.claim_offline_token("a", first));
        assert!(tracker.claim_offline_token("a", second));
        assert!(!tracker.claim_offline_token("a", second));
    }

    #[test]
    fn test_touch_and_online_void_offline_token() {
        let mut issuer = TokenIssuer::new();
        let mut tracker = InactivityTracker::new(Duration::minutes(10));

        let token = issuer.issue();
        tracker.mark_offline("a", now(), token);
        tracker.touch("a", None, now());
        assert!(!tracker.claim_offline_token("a", token));

        let token = issuer.issue();
        tracker.mark_offline("b", now(), token);
        let before = tracker.last_seen("b");
        tracker.mark_online("b");
        assert!(!tracker.claim_offline_token("b", token));
        assert_eq!(tracker.last_seen("b"), before);
    }
}
