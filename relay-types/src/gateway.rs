//! The primary turn interface: what callers hand the orchestrator and what
//! non-streaming callers get back.

use serde::{Deserialize, Serialize};

use crate::completion::{FinishReason, TokenUsage};
use crate::message::Message;
use crate::model::SliderConfig;

/// Per-turn feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnFlags {
    /// Whether memory retrieval runs.
    #[serde(default = "default_true")]
    pub enable_memory: bool,
    /// Whether document retrieval runs.
    #[serde(default = "default_true")]
    pub enable_rag: bool,
    /// Whether MCP tools are offered.
    #[serde(default = "default_true")]
    pub enable_mcp: bool,
    /// Cost/quality preference; `None` uses the stored or default slider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slider: Option<SliderConfig>,
    /// Whether the context cache may be consulted and written.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for TurnFlags {
    fn default() -> Self {
        Self {
            enable_memory: true,
            enable_rag: true,
            enable_mcp: true,
            slider: None,
            cache_enabled: true,
        }
    }
}

/// One turn's worth of input to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// The requesting user.
    pub user_id: String,
    /// The session the turn belongs to.
    pub session_id: String,
    /// Conversation messages, oldest first; the last is the new user turn.
    pub messages: Vec<Message>,
    /// Feature flags.
    #[serde(default)]
    pub flags: TurnFlags,
}

/// Aggregated response for non-streaming callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// The assistant message, with any tool calls.
    pub message: Message,
    /// Why the turn ended.
    pub finish_reason: FinishReason,
    /// Aggregate token usage.
    pub usage: TokenUsage,
    /// The model that served the turn.
    pub model_id: Option<String>,
}

fn default_true() -> bool {
    true
}
