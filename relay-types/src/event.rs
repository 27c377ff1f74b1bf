//! Turn-level event stream.
//!
//! One turn produces one FIFO sequence of [`TurnEvent`]s, always terminated
//! by [`TurnEvent::Done`]. The orchestrator is the single producer; any
//! number of consumers may subscribe, and a consumer that disconnects does
//! not affect the producer.

use serde::{Deserialize, Serialize};

use crate::completion::{FinishReason, TokenUsage};
use crate::error::GatewayError;

/// Lifecycle status of a pipeline stage, for observability consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage has started.
    Started,
    /// The stage finished successfully.
    Completed,
    /// The stage failed but its policy let the turn continue.
    Warned,
    /// The stage failed fatally.
    Failed,
    /// The stage was skipped by an upstream decision.
    Skipped,
}

/// An event emitted during one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Incremental assistant text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// Incremental tool-call assembly from the model.
    ToolCallDelta {
        /// Call identifier, present from the first fragment.
        id: String,
        /// Tool name, present from the first fragment.
        name: String,
        /// JSON fragment of the arguments.
        arguments_delta: String,
    },
    /// A completed tool execution result.
    ToolResult {
        /// The call this result answers.
        tool_call_id: String,
        /// JSON result content.
        content: serde_json::Value,
        /// Whether the tool reported an error.
        is_error: bool,
    },
    /// A pipeline stage changed state.
    StageStatus {
        /// Stage name.
        stage: String,
        /// New status.
        status: StageStatus,
        /// Milliseconds elapsed in the stage, when finished.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    /// A non-fatal failure the turn survived.
    Warning {
        /// Stable failure kind (see error taxonomy).
        kind: String,
        /// Short human-readable message.
        message: String,
    },
    /// Terminal event; always the last event of a turn.
    Done {
        /// Why the turn ended.
        finish_reason: FinishReason,
        /// Aggregate token usage for the turn.
        usage: TokenUsage,
        /// The model that served the turn, when one was reached.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
        /// Failure detail when `finish_reason` is `error`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<GatewayError>,
    },
}

impl TurnEvent {
    /// Whether this is the terminal event of a turn.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, TurnEvent::Done { .. })
    }

    /// Build the terminal event for a successful turn.
    #[must_use]
    pub fn done(finish_reason: FinishReason, usage: TokenUsage, model_id: impl Into<String>) -> Self {
        TurnEvent::Done {
            finish_reason,
            usage,
            model_id: Some(model_id.into()),
            error: None,
        }
    }

    /// Build the terminal event for a failed turn.
    #[must_use]
    pub fn done_error(error: GatewayError, usage: TokenUsage, model_id: Option<String>) -> Self {
        TurnEvent::Done {
            finish_reason: FinishReason::Error,
            usage,
            model_id,
            error: Some(error),
        }
    }
}
