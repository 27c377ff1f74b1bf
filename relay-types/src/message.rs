//! Canonical message model.
//!
//! The gateway's wire shape is the chat-completions form regardless of which
//! provider ultimately serves the request. Provider adapters convert to and
//! from their native shapes; everything above the provider layer speaks only
//! these types.

use serde::{Deserialize, Serialize};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// A human user.
    User,
    /// The model.
    Assistant,
    /// A tool result addressed back to the model.
    Tool,
}

/// Source for image content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Base64-encoded image data.
    Base64 {
        /// The encoded bytes.
        data: String,
    },
    /// URL pointing to an image.
    Url {
        /// The image URL.
        url: String,
    },
}

/// A single typed part within multi-part message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content.
    Image {
        /// Where the image bytes come from.
        source: ImageSource,
        /// MIME type of the image.
        media_type: String,
    },
}

/// Message content: either a bare string or typed parts.
///
/// Providers that only accept strings receive the flattened text form;
/// providers with typed parts receive `Parts` as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// A plain string.
    Text(String),
    /// Typed content parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of all textual content, ignoring images.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether any part is an image.
    #[must_use]
    pub fn has_image(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })))
    }

    /// Character length of the textual content.
    #[must_use]
    pub fn text_len(&self) -> usize {
        match self {
            MessageContent::Text(s) => s.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Image { .. } => 0,
                })
                .sum(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call identifier.
    pub id: String,
    /// Dotted tool id (`<server>.<name>`) or bare function name.
    pub name: String,
    /// Parsed JSON arguments. Parse failures upstream yield `{}`.
    pub arguments: serde_json::Value,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: MessageContent,
    /// Tool calls made by the assistant, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages, the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a user message with plain text content.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message with plain text content.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message with plain text content.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a tool-result message answering `tool_call_id`.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn content_untagged_roundtrip() {
        let text = MessageContent::Text("hi".into());
        let v = serde_json::to_value(&text).unwrap();
        assert_eq!(v, json!("hi"));
        let back: MessageContent = serde_json::from_value(v).unwrap();
        assert_eq!(back, text);

        let parts = MessageContent::Parts(vec![ContentPart::Text { text: "hi".into() }]);
        let v = serde_json::to_value(&parts).unwrap();
        assert_eq!(v[0]["type"], "text");
        let back: MessageContent = serde_json::from_value(v).unwrap();
        assert_eq!(back, parts);
    }

    #[test]
    fn as_text_flattens_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::Image {
                source: ImageSource::Url { url: "https://x/i.png".into() },
                media_type: "image/png".into(),
            },
            ContentPart::Text { text: "b".into() },
        ]);
        assert_eq!(content.as_text(), "a\nb");
        assert!(content.has_image());
        assert_eq!(content.text_len(), 2);
    }

    #[test]
    fn tool_result_message_shape() {
        let msg = Message::tool_result("call_1", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("tool_calls").is_none());
    }

    #[test]
    fn message_roundtrip_with_tool_calls() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "azure.subscription_list".into(),
                arguments: json!({}),
            }],
            tool_call_id: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, msg);
    }
}
