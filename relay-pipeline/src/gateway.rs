//! Gateway wiring.
//!
//! Pulls the whole core together: stores, memory, tools, context, routing,
//! providers, pricing, and the orchestrator. A process builds one
//! [`Gateway`] at startup and runs turns against it; there are no global
//! singletons, every collaborator arrives through [`GatewayDeps`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use relay_context::ContextAssembler;
use relay_mcp::ToolAccess;
use relay_memory::MemoryManager;
use relay_pricing::PricingService;
use relay_providers::ProviderManager;
use relay_router::{ModelCatalog, SmartRouter, TieredRouter};
use relay_store::LockManager;
use relay_types::{GatewayError, GatewayRequest, GatewayResponse};

use crate::orchestrator::{
    Pipeline, PipelineConfig, TurnHandle, TurnReport, collect_response,
};
use crate::stage::Stage;
use crate::stages::{
    AuthStage, ContextStage, LlmStage, McpStage, MemoryStage, MetricsStage, PersistStage,
    RouteStage, TieredStage,
};
use crate::store::{TurnStore, UserStore};

/// Everything the standard pipeline needs.
pub struct GatewayDeps {
    /// User directory.
    pub users: Arc<dyn UserStore>,
    /// Turn log and usage rows.
    pub turns: Arc<dyn TurnStore>,
    /// Memory manager.
    pub memory: Arc<MemoryManager>,
    /// Tool catalog + access control.
    pub tools: Arc<ToolAccess>,
    /// Context assembler.
    pub assembler: Arc<ContextAssembler>,
    /// Model capability catalog.
    pub catalog: Arc<ModelCatalog>,
    /// Tiered function-calling router.
    pub tiered: Arc<TieredRouter>,
    /// Smart model router.
    pub smart: Arc<SmartRouter>,
    /// Provider fleet.
    pub providers: Arc<ProviderManager>,
    /// Pricing service.
    pub pricing: Arc<PricingService>,
    /// Base system prompt.
    pub system_prompt: String,
    /// Model the context stage sizes against before routing runs.
    pub default_model: Option<String>,
}

/// The standard stage order:
/// `[auth, memory, mcp, context, tiered_fc, route, llm, persist, metrics]`.
#[must_use]
pub fn standard_stages(deps: &GatewayDeps) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(AuthStage::new(deps.users.clone())),
        Box::new(MemoryStage::new(deps.memory.clone())),
        Box::new(McpStage::new(deps.tools.clone())),
        Box::new(ContextStage::new(
            deps.assembler.clone(),
            deps.catalog.clone(),
            deps.system_prompt.clone(),
            deps.default_model.clone(),
        )),
        Box::new(TieredStage::new(deps.tiered.clone())),
        Box::new(RouteStage::new(deps.smart.clone())),
        Box::new(LlmStage::new(deps.providers.clone())),
        Box::new(PersistStage::new(deps.turns.clone())),
        Box::new(MetricsStage::new(deps.pricing.clone(), deps.turns.clone())),
    ]
}

/// The assembled gateway core.
pub struct Gateway {
    pipeline: Arc<Pipeline>,
}

impl Gateway {
    /// Wire the standard pipeline.
    #[must_use]
    pub fn new(deps: GatewayDeps, locks: LockManager, config: PipelineConfig) -> Self {
        let stages = standard_stages(&deps);
        Self {
            pipeline: Arc::new(Pipeline::new(stages, locks, config)),
        }
    }

    /// Run one streaming turn.
    #[must_use]
    pub fn run_turn(&self, request: GatewayRequest, cancel: CancellationToken) -> TurnHandle {
        self.pipeline.spawn(request, cancel)
    }

    /// Run one turn and aggregate the stream for non-streaming callers.
    pub async fn run_collect(
        &self,
        request: GatewayRequest,
    ) -> (Result<GatewayResponse, GatewayError>, TurnReport) {
        let handle = self.run_turn(request, CancellationToken::new());
        let response = collect_response(handle.events).await;
        let report = handle.report.await.unwrap_or(TurnReport {
            turn_id: String::new(),
            finish_reason: relay_types::FinishReason::Error,
            usage: relay_types::TokenUsage::default(),
            model_id: None,
            error: Some(GatewayError::internal("turn task panicked")),
            persisted: false,
            busy: false,
        });
        (response, report)
    }
}
