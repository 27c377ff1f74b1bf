//! Identity, session, and turn records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{MessageContent, Role, ToolCall};

/// A gateway user. Mutated only by admin paths; the pipeline reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Directory group ids the user belongs to.
    pub groups: Vec<String>,
    /// Whether the user has admin privileges.
    pub is_admin: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A conversation session. Turns append in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Human-readable title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One message of the append-only turn log. Never rewritten once finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn identifier.
    pub id: String,
    /// The session this turn belongs to.
    pub session_id: String,
    /// Author role.
    pub role: Role,
    /// Message content.
    pub content: MessageContent,
    /// Tool calls, for assistant turns that requested tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The model that produced this turn, for assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Per-assistant-turn record of which prompt machinery was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptUsage {
    /// The session the turn belongs to.
    pub session_id: String,
    /// The assistant message this row describes.
    pub message_id: String,
    /// The user the turn served.
    pub user_id: String,
    /// Base prompt template id, if one was applied.
    pub base_template_id: Option<String>,
    /// Domain prompt template id, if one was applied.
    pub domain_template_id: Option<String>,
    /// Final system prompt length in characters.
    pub system_prompt_length: usize,
    /// Prompting techniques applied to this turn.
    pub techniques_applied: Vec<String>,
    /// Tokens the prompt machinery added on top of the raw conversation.
    pub tokens_added: u64,
    /// Whether output formatting instructions were injected.
    pub has_formatting: bool,
    /// Whether MCP tool context was injected.
    pub has_mcp_context: bool,
    /// Whether retrieved documents were injected.
    pub has_rag_context: bool,
    /// Whether memory context was injected.
    pub has_memory_context: bool,
    /// Number of retrieved documents injected.
    pub rag_docs_count: usize,
    /// Number of MCP tools offered.
    pub mcp_tools_count: usize,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_roundtrip() {
        let turn = Turn {
            id: "t-1".into(),
            session_id: "s-1".into(),
            role: Role::Assistant,
            content: MessageContent::Text("hello".into()),
            tool_calls: vec![],
            model: Some("gpt-4o".into()),
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&turn).unwrap();
        assert!(v.get("tool_calls").is_none());
        let back: Turn = serde_json::from_value(v).unwrap();
        assert_eq!(back, turn);
    }
}
