//! The per-turn pipeline context.

use std::collections::HashSet;

use relay_context::AugmentedContext;
use relay_pricing::CostBreakdown;
use relay_router::{RoutingDecision, TieredDecision};
use relay_types::{
    CompletionResponse, ErrorKind, GatewayRequest, MemoryEntry, SliderConfig, TokenUsage,
    ToolDescriptor, User,
};

/// Everything one turn accumulates as it moves through the stages.
///
/// Owned exclusively by the orchestrator for the duration of the turn;
/// stages mutate it by filling in their named fields.
pub struct PipelineContext {
    /// Unique id for this turn.
    pub turn_id: String,
    /// The original request.
    pub request: GatewayRequest,
    /// Resolved by the auth stage.
    pub user: Option<User>,
    /// Effective slider for the turn.
    pub slider: SliderConfig,
    /// Policy-filtered tool catalog (may be stripped by tiered-FC).
    pub tools: Vec<ToolDescriptor>,
    /// Memories retrieved for the turn.
    pub retrieved_memories: Vec<MemoryEntry>,
    /// Rendered memory block for the system prompt.
    pub memory_block: String,
    /// Assembled context.
    pub augmented: Option<AugmentedContext>,
    /// Tiered function-calling verdict.
    pub tiered: Option<TieredDecision>,
    /// Routing verdict.
    pub routing: Option<RoutingDecision>,
    /// The assembled provider response.
    pub response: Option<CompletionResponse>,
    /// The model that actually served the turn.
    pub served_model: Option<String>,
    /// Aggregate usage.
    pub usage: TokenUsage,
    /// Cost computed by the metrics stage.
    pub cost: Option<CostBreakdown>,
    /// Whether the turn reached durable storage.
    pub persisted: bool,
    warned: HashSet<ErrorKind>,
}

impl PipelineContext {
    /// Start a fresh context for a request.
    #[must_use]
    pub fn new(request: GatewayRequest) -> Self {
        let slider = request.flags.slider.clone().unwrap_or_default();
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            request,
            user: None,
            slider,
            tools: Vec::new(),
            retrieved_memories: Vec::new(),
            memory_block: String::new(),
            augmented: None,
            tiered: None,
            routing: None,
            response: None,
            served_model: None,
            usage: TokenUsage::default(),
            cost: None,
            persisted: false,
            warned: HashSet::new(),
        }
    }

    /// The text of the latest user message, or empty.
    #[must_use]
    pub fn latest_user_text(&self) -> String {
        self.request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == relay_types::Role::User)
            .map(|m| m.content.as_text())
            .unwrap_or_default()
    }

    /// Record a non-fatal failure; returns `true` the first time a kind is
    /// seen this turn (callers emit one warning per kind).
    pub fn warn_once(&mut self, kind: ErrorKind) -> bool {
        self.warned.insert(kind)
    }
}
