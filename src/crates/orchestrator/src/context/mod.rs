//! Context composition for a request
//!
//! Keeps a window of recent history within a token budget and renders user
//! memory and preferences into a system preamble.

pub mod token_counter;
pub mod trimmer;

pub use token_counter::{estimate_usage, TokenCount, TokenCounter};
pub use trimmer::ContextTrimmer;

use llm::ChatMessage;
use std::collections::BTreeMap;

/// Token budget for the history window
pub const DEFAULT_HISTORY_TOKENS: usize = 4_000;

/// History window and memory rendered for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedContext {
    pub history: Vec<ChatMessage>,
    /// System text carrying memory snippets and preferences
    pub preamble: Option<String>,
}

/// Builds [`ComposedContext`]s
#[derive(Debug, Clone)]
pub struct ContextComposer {
    history_window: usize,
    trimmer: ContextTrimmer,
}

impl ContextComposer {
    pub fn new(history_window: usize, max_history_tokens: usize) -> Self {
        Self {
            history_window,
            trimmer: ContextTrimmer::new(max_history_tokens),
        }
    }

    pub fn compose(
        &self,
        history: &[ChatMessage],
        memory: &[String],
        preferences: &BTreeMap<String, String>,
    ) -> ComposedContext {
        let start = history.len().saturating_sub(self.history_window);
        let windowed = &history[start..];

        ComposedContext {
            history: self.trimmer.trim_messages(windowed),
            preamble: render_preamble(memory, preferences),
        }
    }
}

impl Default for ContextComposer {
    fn default() -> Self {
        Self::new(10, DEFAULT_HISTORY_TOKENS)
    }
}

fn render_preamble(memory: &[String], preferences: &BTreeMap<String, String>) -> Option<String> {
    let memory: Vec<&str> = memory
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .collect();
    if memory.is_empty() && preferences.is_empty() {
        return None;
    }

    let mut out = String::new();
    if !memory.is_empty() {
        out.push_str("What you know about the user:\n");
        for snippet in memory {
            out.push_str("- ");
            out.push_str(snippet);
            out.push('\n');
        }
    }
    if !preferences.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("User preferences:\n");
        for (key, value) in preferences {
            out.push_str(&format!("- {}: {}\n", key, value));
        }
    }
    Some(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_window() {
        let history: Vec<ChatMessage> = (0..15)
            .map(|i| ChatMessage::user(format!("message {}", i)))
            .collect();
        let composed = ContextComposer::default().compose(&history, &[], &BTreeMap::new());

        assert_eq!(composed.history.len(), 10);
        assert_eq!(composed.history[0].content, "message 5");
        assert!(composed.preamble.is_none());
    }

    #[test]
    fn test_preamble() {
        let mut prefs = BTreeMap::new();
        prefs.insert("language".to_string(), "Turkish".to_string());
        let composed = ContextComposer::default().compose(
            &[],
            &["Lives in Ankara".to_string(), "  ".to_string()],
            &prefs,
        );

        let preamble = composed.preamble.unwrap();
        assert!(preamble.contains("- Lives in Ankara"));
        assert!(preamble.contains("- language: Turkish"));
        assert_eq!(preamble.matches("- ").count(), 2);
    }
}
