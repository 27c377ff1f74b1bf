//! Token count estimation.

use relay_types::{Message, MessageContent, ToolSchema};

/// Heuristic token estimator: `ceil(chars / 4)`.
///
/// Real tokenization varies per model; four chars per token approximates
/// the GPT and Claude families closely enough for budgeting, and every
/// budget check in the engine uses this same estimator so the invariants
/// hold internally.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    chars_per_token: usize,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    /// Estimator with the default 4 chars/token ratio.
    #[must_use]
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }

    /// Estimator with a custom ratio (clamped to at least 1).
    #[must_use]
    pub fn with_ratio(chars_per_token: usize) -> Self {
        Self { chars_per_token: chars_per_token.max(1) }
    }

    /// Estimated tokens in a text string.
    #[must_use]
    pub fn estimate_text(&self, text: &str) -> u64 {
        (text.len().div_ceil(self.chars_per_token)) as u64
    }

    /// Estimated tokens in one message, with a small per-message overhead
    /// for role markers.
    #[must_use]
    pub fn estimate_message(&self, message: &Message) -> u64 {
        let content = match &message.content {
            MessageContent::Text(text) => self.estimate_text(text),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    relay_types::ContentPart::Text { text } => self.estimate_text(text),
                    relay_types::ContentPart::Image { .. } => 300,
                })
                .sum(),
        };
        let calls: u64 = message
            .tool_calls
            .iter()
            .map(|call| {
                self.estimate_text(&call.name) + self.estimate_text(&call.arguments.to_string())
            })
            .sum();
        4 + content + calls
    }

    /// Estimated tokens across a slice of messages.
    #[must_use]
    pub fn estimate_messages(&self, messages: &[Message]) -> u64 {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Estimated tokens for a tool catalog.
    #[must_use]
    pub fn estimate_tools(&self, tools: &[ToolSchema]) -> u64 {
        tools
            .iter()
            .map(|tool| {
                self.estimate_text(&tool.name)
                    + self.estimate_text(&tool.description)
                    + self.estimate_text(&tool.parameters.to_string())
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_chars_per_token_rounds_up() {
        let counter = TokenCounter::new();
        assert_eq!(counter.estimate_text(""), 0);
        assert_eq!(counter.estimate_text("abc"), 1);
        assert_eq!(counter.estimate_text("abcd"), 1);
        assert_eq!(counter.estimate_text("abcde"), 2);
    }

    #[test]
    fn message_overhead_is_four() {
        let counter = TokenCounter::new();
        let message = Message::user("abcd");
        assert_eq!(counter.estimate_message(&message), 5);
    }

    #[test]
    fn images_are_flat_rated() {
        let counter = TokenCounter::new();
        let message = Message {
            role: relay_types::Role::User,
            content: MessageContent::Parts(vec![relay_types::ContentPart::Image {
                source: relay_types::ImageSource::Url { url: "https://x/i.png".into() },
                media_type: "image/png".into(),
            }]),
            tool_calls: vec![],
            tool_call_id: None,
        };
        assert_eq!(counter.estimate_message(&message), 304);
    }

    #[test]
    fn custom_ratio_clamps_to_one() {
        let counter = TokenCounter::with_ratio(0);
        assert_eq!(counter.estimate_text("ab"), 2);
    }
}
