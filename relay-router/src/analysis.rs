//! Request analysis.
//!
//! Cheap keyword heuristics over the turn's messages; every signal here
//! feeds the filter and scoring stages. Deterministic by construction.

use relay_types::{Message, ToolSchema};
use serde::{Deserialize, Serialize};

const CLOUD_KEYWORDS: &[&str] = &["azure", "aws", "gcp", "amazon", "google cloud", "cloudflare"];

const REASONING_PHRASES: &[&str] =
    &["analyze", "compare", "explain why", "step by step", "reason through"];

const SEQUENCE_MARKERS: &[&str] =
    &["first", "then", "next", "after that", "finally", "afterwards"];

/// Token threshold above which a conversation counts as long.
pub const LONG_CONVERSATION_TOKENS: u64 = 8_000;

/// Signals extracted from one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestAnalysis {
    /// Tools are attached to the request.
    pub has_tools: bool,
    /// How many tools.
    pub tool_count: usize,
    /// At least two distinct cloud vendors are mentioned.
    pub is_multi_cloud: bool,
    /// Reasoning phrases are present.
    pub is_complex_reasoning: bool,
    /// The request reads as a multi-step task.
    pub is_multi_step: bool,
    /// Any message part is an image.
    pub requires_vision: bool,
    /// `ceil(total chars / 4)`.
    pub estimated_tokens: u64,
}

impl RequestAnalysis {
    /// Whether the conversation is long enough to prefer big windows.
    #[must_use]
    pub fn is_long_conversation(&self) -> bool {
        self.estimated_tokens > LONG_CONVERSATION_TOKENS
    }

    /// Whether the request demands strong function calling.
    #[must_use]
    pub fn demands_function_calling(&self) -> bool {
        self.has_tools || self.is_multi_step || self.is_multi_cloud
    }
}

/// Analyze a request's messages and tool list.
#[must_use]
pub fn analyze(messages: &[Message], tools: &[ToolSchema]) -> RequestAnalysis {
    let combined: String = messages
        .iter()
        .map(|m| m.content.as_text())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();

    let cloud_mentions = CLOUD_KEYWORDS
        .iter()
        .filter(|k| combined.contains(*k))
        .count();

    let sequence_hits = SEQUENCE_MARKERS
        .iter()
        .filter(|m| combined.contains(*m))
        .count();
    let numbered_items = combined
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed
                .split_once(['.', ')'])
                .is_some_and(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
        })
        .count();

    let total_chars: usize = messages.iter().map(|m| m.content.text_len()).sum();

    RequestAnalysis {
        has_tools: !tools.is_empty(),
        tool_count: tools.len(),
        is_multi_cloud: cloud_mentions >= 2,
        is_complex_reasoning: REASONING_PHRASES.iter().any(|p| combined.contains(p)),
        is_multi_step: sequence_hits >= 2 || numbered_items >= 2,
        requires_vision: messages.iter().any(|m| m.content.has_image()),
        estimated_tokens: (total_chars.div_ceil(4)) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{ContentPart, ImageSource, MessageContent, Role};

    fn tool() -> ToolSchema {
        ToolSchema {
            name: "t".into(),
            description: "d".into(),
            parameters: serde_json::json!({}),
        }
    }

    #[test]
    fn tools_and_counts() {
        let analysis = analyze(&[Message::user("hi")], &[tool(), tool()]);
        assert!(analysis.has_tools);
        assert_eq!(analysis.tool_count, 2);
        assert!(analysis.demands_function_calling());
    }

    #[test]
    fn multi_cloud_needs_two_vendors() {
        let one = analyze(&[Message::user("list my azure subscriptions")], &[]);
        assert!(!one.is_multi_cloud);
        let two = analyze(
            &[Message::user("sync data from azure blob storage to aws s3")],
            &[],
        );
        assert!(two.is_multi_cloud);
    }

    #[test]
    fn reasoning_phrases() {
        assert!(
            analyze(&[Message::user("compare these two designs step by step")], &[])
                .is_complex_reasoning
        );
        assert!(!analyze(&[Message::user("hello")], &[]).is_complex_reasoning);
    }

    #[test]
    fn multi_step_from_markers_or_numbering() {
        assert!(
            analyze(
                &[Message::user("first create the group, then deploy the cluster")],
                &[]
            )
            .is_multi_step
        );
        assert!(
            analyze(
                &[Message::user("1. create the vnet\n2. add a subnet\n3. open the firewall")],
                &[]
            )
            .is_multi_step
        );
        assert!(!analyze(&[Message::user("just say hi")], &[]).is_multi_step);
    }

    #[test]
    fn vision_detection() {
        let message = Message {
            role: Role::User,
            content: MessageContent::Parts(vec![ContentPart::Image {
                source: ImageSource::Url { url: "https://x/i.png".into() },
                media_type: "image/png".into(),
            }]),
            tool_calls: vec![],
            tool_call_id: None,
        };
        assert!(analyze(&[message], &[]).requires_vision);
    }

    #[test]
    fn token_estimate_rounds_up() {
        let analysis = analyze(&[Message::user("abcde")], &[]);
        assert_eq!(analysis.estimated_tokens, 2);
    }

    #[test]
    fn long_conversation_threshold() {
        let long = analyze(&[Message::user(&"x".repeat(40_000))], &[]);
        assert!(long.is_long_conversation());
    }
}
