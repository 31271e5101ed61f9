//! Token estimation.

use crate::types::Message;

/// Bytes of UTF-8 text per token used by the rough estimators.
pub const BYTES_PER_TOKEN: usize = 4;

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;

    fn count_messages(&self, messages: &[Message]) -> usize {
        // Role markers and separators cost a few tokens per message.
        messages.iter().map(|m| self.count(&m.content) + 4).sum::<usize>() + 3
    }
}

#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}

impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(BYTES_PER_TOKEN as f64)
    }

    pub fn with_ratio(r: f64) -> Self {
        Self { chars_per_token: r }
    }
}

impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Rough token count for a payload of `bytes` bytes.
pub fn estimate_tokens_from_bytes(bytes: usize) -> usize {
    bytes / BYTES_PER_TOKEN
}

/// Payload size at which [`estimate_tokens_from_bytes`] reaches `tokens`.
pub fn byte_threshold_for_tokens(tokens: usize) -> usize {
    tokens.saturating_mul(BYTES_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_round_trip() {
        for t in [4096usize, 8192, 16384, 32768, 65536, 131072] {
            let est = estimate_tokens_from_bytes(byte_threshold_for_tokens(t));
            assert!(est.abs_diff(t) <= 10, "{} vs {}", est, t);
        }
    }

    #[test]
    fn test_character_estimator_rounds_up() {
        let c = CharacterEstimator::new();
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("abc"), 1);
        assert_eq!(c.count("abcdefgh"), 2);
        assert_eq!(c.count("abcdefghi"), 3);
    }

    #[test]
    fn test_count_messages_adds_overhead() {
        let c = CharacterEstimator::new();
        let msgs = vec![Message::user("abcd"), Message::assistant("abcdefgh")];
        assert_eq!(c.count_messages(&msgs), 1 + 4 + 2 + 4 + 3);
    }
}
