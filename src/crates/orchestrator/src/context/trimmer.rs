//! History trimming
//!
//! Keeps the most recent messages that fit within a token budget.

use crate::context::token_counter::TokenCounter;
use llm::ChatMessage;

/// Context trimmer for managing message history
#[derive(Debug, Clone)]
pub struct ContextTrimmer {
    counter: TokenCounter,
    max_tokens: usize,
}

impl ContextTrimmer {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            counter: TokenCounter::new(),
            max_tokens,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Trim messages to fit within the token limit, dropping the oldest first
    pub fn trim_messages(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        if self.counter.count_messages(messages).tokens <= self.max_tokens {
            return messages.to_vec();
        }

        let mut kept = Vec::new();
        let mut current_tokens = 0;

        // Iterate from most recent
        for message in messages.iter().rev() {
            let msg_tokens = self.counter.count_message(message).tokens;
            if current_tokens + msg_tokens > self.max_tokens {
                break;
            }
            kept.push(message.clone());
            current_tokens += msg_tokens;
        }

        kept.reverse();
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_trim_when_under_limit() {
        let trimmer = ContextTrimmer::new(1_000);
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        assert_eq!(trimmer.trim_messages(&messages), messages);
    }

    #[test]
    fn test_trim_keeps_most_recent() {
        // Each message: 1 + 25 + 3 = 29 tokens
        let long = "x".repeat(100);
        let messages: Vec<ChatMessage> = (0..5)
            .map(|i| ChatMessage::user(format!("{}{}", i, &long[1..])))
            .collect();

        let trimmer = ContextTrimmer::new(60);
        let kept = trimmer.trim_messages(&messages);

        assert_eq!(kept.len(), 2);
        assert!(kept[0].content.starts_with('3'));
        assert!(kept[1].content.starts_with('4'));
    }

    #[test]
    fn test_trim_everything_when_last_too_big() {
        let trimmer = ContextTrimmer::new(3);
        let kept = trimmer.trim_messages(&[ChatMessage::user("a long enough message")]);
        assert!(kept.is_empty());
    }
}
