//! Utility functions for the lobby service

use crate::types::GenerationToken;
use chrono::{DateTime, Utc};

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Hands out generation tokens that are never reused for the lifetime of the issuer
#[derive(Debug, Default)]
pub struct TokenIssuer {
    issued: u64,
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a token distinct from every token issued before it
    pub fn issue(&mut self) -> GenerationToken {
        self.issued += 1;
        GenerationToken::from_raw(self.issued)
    }
}

/// Centre `text` in a field of `width` characters
pub fn pad_centred(text: &str, width: usize) -> String {
    let len = text.chars().count();
    let total = width.saturating_sub(len);
    let left = total / 2;
    let right = total - left;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(right))
}

/// Split command arguments on whitespace, dropping empties
pub fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_never_repeat() {
        let mut issuer = TokenIssuer::new();
        let first = issuer.issue();
        let second = issuer.issue();
        assert_ne!(first, second);
        assert_eq!(first, first);
    }

    #[test]
    fn test_pad_centred() {
        assert_eq!(pad_centred("duel", 11), "   duel    ");
        assert_eq!(pad_centred("", 3), "   ");
        assert_eq!(pad_centred("muchtoolongname", 11), "muchtoolongname");
    }

    #[test]
    fn test_words() {
        assert_eq!(words("  duel   ffa "), vec!["duel", "ffa"]);
        assert!(words("   ").is_empty());
    }
}
