//! Pending formation and the per-round confirmation decision
//!
//! A formation is created the instant a queue fills and lives until it is
//! formed or aborted. Every delayed round carries the token of the formation
//! that scheduled it; a round whose token does not match the live formation
//! is stale and must not touch anything.

use crate::types::{GenerationToken, ParticipantId, PendingSnapshot, QueueName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Externally visible state of the confirmation machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationState {
    Idle,
    AwaitingConfirmation { queue: QueueName, attempt: u32 },
}

/// How a formation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormationOutcome {
    Formed,
    Aborted,
}

impl FormationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormationOutcome::Formed => "formed",
            FormationOutcome::Aborted => "aborted",
        }
    }
}

/// What a confirmation round should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundDecision {
    /// The round belongs to a formation that no longer exists
    Stale,
    /// Everyone confirmed
    Form,
    /// Out of rounds; remove these candidates
    Abort { candidates: Vec<ParticipantId> },
    /// Ping these candidates and try again later
    Remind { candidates: Vec<ParticipantId> },
}

/// The single in-flight formation
#[derive(Debug, Clone)]
pub struct PendingFormation {
    queue: QueueName,
    token: GenerationToken,
    afk_candidates: Vec<ParticipantId>,
    attempt: u32,
    started_at: DateTime<Utc>,
}

impl PendingFormation {
    pub fn new(
        queue: QueueName,
        token: GenerationToken,
        afk_candidates: Vec<ParticipantId>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue,
            token,
            afk_candidates,
            attempt: 1,
            started_at,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn token(&self) -> GenerationToken {
        self.token
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn afk_candidates(&self) -> &[ParticipantId] {
        &self.afk_candidates
    }

    /// Clear a candidate who showed activity. Returns whether they were pending.
    pub fn confirm(&mut self, participant: &str) -> bool {
        let before = self.afk_candidates.len();
        self.afk_candidates.retain(|c| c != participant);
        self.afk_candidates.len() != before
    }

    pub fn is_confirmed(&self) -> bool {
        self.afk_candidates.is_empty()
    }

    /// Decide what the round carrying `token` and `attempt` should do.
    /// A round scheduled for a different attempt of this formation is stale too.
    pub fn evaluate(
        &self,
        token: GenerationToken,
        attempt: u32,
        max_rounds: u32,
    ) -> RoundDecision {
        if token != self.token || attempt != self.attempt {
            return RoundDecision::Stale;
        }
        if self.is_confirmed() {
            return RoundDecision::Form;
        }
        if self.attempt >= max_rounds {
            return RoundDecision::Abort {
                candidates: self.afk_candidates.clone(),
            };
        }
        RoundDecision::Remind {
            candidates: self.afk_candidates.clone(),
        }
    }

    /// Move to the next round, returning its attempt number
    pub fn advance(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            queue: self.queue.clone(),
            attempt: self.attempt,
            afk_candidates: self.afk_candidates.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::TokenIssuer;

    fn pending(issuer: &mut TokenIssuer, candidates: &[&str]) -> PendingFormation {
        PendingFormation::new(
            "duel".to_string(),
            issuer.issue(),
            candidates.iter().map(|c| c.to_string()).collect(),
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_candidates_form_immediately() {
        let mut issuer = TokenIssuer::new();
        let formation = pending(&mut issuer, &[]);
        assert_eq!(formation.attempt(), 1);
        assert_eq!(formation.evaluate(formation.token(), formation.attempt(), 4), RoundDecision::Form);
    }

    #[test]
    fn test_foreign_token_is_stale() {
        let mut issuer = TokenIssuer::new();
        let old = pending(&mut issuer, &["a"]);
        let current = pending(&mut issuer, &[]);
        assert_eq!(current.evaluate(old.token(), 1, 4), RoundDecision::Stale);
    }

    #[test]
    fn test_rounds_remind_then_abort() {
        let mut issuer = TokenIssuer::new();
        let mut formation = pending(&mut issuer, &["a", "b"]);
        let token = formation.token();

        for _ in 1..3 {
            assert!(matches!(
                formation.evaluate(token, formation.attempt(), 3),
                RoundDecision::Remind { .. }
            ));
            formation.advance();
        }

        assert_eq!(
            formation.evaluate(token, formation.attempt(), 3),
            RoundDecision::Abort {
                candidates: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_single_round_aborts_on_first_evaluation() {
        let mut issuer = TokenIssuer::new();
        let formation = pending(&mut issuer, &["a"]);
        assert!(matches!(
            formation.evaluate(formation.token(), 1, 1),
            RoundDecision::Abort { .. }
        ));
    }

    #[test]
    fn test_round_for_another_attempt_is_stale() {
        let mut issuer = TokenIssuer::new();
        let mut formation = pending(&mut issuer, &["a"]);
        let token = formation.token();

        assert_eq!(formation.evaluate(token, 2, 4), RoundDecision::Stale);
        formation.advance();
        assert_eq!(formation.evaluate(token, 1, 4), RoundDecision::Stale);
        assert!(matches!(
            formation.evaluate(token, 2, 4),
            RoundDecision::Remind { .. }
        ));
    }

    #[test]
    fn test_confirm_clears_candidates() {
        let mut issuer = TokenIssuer::new();
        let mut formation = pending(&mut issuer, &["a", "b"]);

        assert!(formation.confirm("a"));
        assert!(!formation.confirm("a"));
        assert!(!formation.confirm("zed"));
        assert!(!formation.is_confirmed());
        assert!(formation.confirm("b"));
        assert!(formation.is_confirmed());
        assert_eq!(formation.evaluate(formation.token(), formation.attempt(), 4), RoundDecision::Form);
    }
}
