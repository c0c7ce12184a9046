//! Token estimation
//!
//! Used when a provider omits usage and when trimming history to a budget.
//! A character-ratio approximation is close enough for budgeting.

use llm::ChatMessage;

/// Token count result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenCount {
    /// Number of tokens
    pub tokens: usize,
    /// Characters counted
    pub chars: usize,
}

impl TokenCount {
    pub fn new(tokens: usize, chars: usize) -> Self {
        Self { tokens, chars }
    }

    pub fn add(&mut self, other: TokenCount) {
        self.tokens += other.tokens;
        self.chars += other.chars;
    }
}

/// Approximate token counter (~4 characters per token)
#[derive(Debug, Clone, Copy)]
pub struct TokenCounter {
    tokens_per_char: f32,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            tokens_per_char: 0.25,
        }
    }

    /// Override the tokens-per-character ratio
    pub fn with_ratio(mut self, tokens_per_char: f32) -> Self {
        self.tokens_per_char = tokens_per_char.max(0.01);
        self
    }

    pub fn count_text(&self, text: &str) -> TokenCount {
        let chars = text.chars().count();
        let tokens = (chars as f32 * self.tokens_per_char).ceil() as usize;
        TokenCount::new(tokens, chars)
    }

    /// Role (1 token) + content + formatting overhead (3 tokens)
    pub fn count_message(&self, message: &ChatMessage) -> TokenCount {
        let mut total = TokenCount::new(1, 0);
        total.add(self.count_text(&message.content));
        total.add(TokenCount::new(3, 0));
        total
    }

    pub fn count_messages(&self, messages: &[ChatMessage]) -> TokenCount {
        let mut total = TokenCount::default();
        for message in messages {
            total.add(self.count_message(message));
        }
        total
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Estimate tokens spent on a call from its prompt and output
pub fn estimate_usage(messages: &[ChatMessage], output: &str) -> usize {
    let counter = TokenCounter::new();
    counter.count_messages(messages).tokens + counter.count_text(output).tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_text() {
        let counter = TokenCounter::new();
        let count = counter.count_text("Hello, world!");

        // 13 chars at 0.25 tokens/char
        assert_eq!(count.tokens, 4);
        assert_eq!(count.chars, 13);
    }

    #[test]
    fn test_count_text_multibyte() {
        let count = TokenCounter::new().count_text("çğıöşü");
        assert_eq!(count.chars, 6);
        assert_eq!(count.tokens, 2);
    }

    #[test]
    fn test_count_message_overhead() {
        let count = TokenCounter::new().count_message(&ChatMessage::user("Hello, world!"));
        assert_eq!(count.tokens, 1 + 4 + 3);
    }

    #[test]
    fn test_estimate_usage() {
        let messages = vec![ChatMessage::system("abcd"), ChatMessage::user("abcdefgh")];
        // (1+1+3) + (1+2+3) + 3
        assert_eq!(estimate_usage(&messages, "abcdefghij"), 14);
    }
}
