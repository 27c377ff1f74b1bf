//! Cost accounting and prompt-usage recording.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use relay_pricing::PricingService;
use relay_types::{GatewayError, PromptUsage};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};
use crate::store::TurnStore;

/// Computes turn cost and writes the prompt-usage row.
pub struct MetricsStage {
    pricing: Arc<PricingService>,
    store: Arc<dyn TurnStore>,
}

impl MetricsStage {
    /// Build the stage.
    #[must_use]
    pub fn new(pricing: Arc<PricingService>, store: Arc<dyn TurnStore>) -> Self {
        Self { pricing, store }
    }
}

#[async_trait]
impl Stage for MetricsStage {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        let Some(model) = ctx.served_model.clone() else {
            return Ok(());
        };

        let cost = self
            .pricing
            .calculate_cost(
                &model,
                ctx.usage.prompt_tokens,
                ctx.usage.completion_tokens,
                None,
            )
            .await;
        tracing::info!(
            model = %model,
            prompt_tokens = ctx.usage.prompt_tokens,
            completion_tokens = ctx.usage.completion_tokens,
            total_cost = %cost.total_cost,
            "relay.pipeline.turn_cost"
        );
        ctx.cost = Some(cost);

        let augmented = ctx.augmented.as_ref();
        let row = PromptUsage {
            session_id: ctx.request.session_id.clone(),
            message_id: ctx.turn_id.clone(),
            user_id: ctx.request.user_id.clone(),
            base_template_id: None,
            domain_template_id: None,
            system_prompt_length: augmented.map_or(0, |a| a.system_prompt.len()),
            techniques_applied: Vec::new(),
            tokens_added: augmented.map_or(0, |a| a.total_tokens),
            has_formatting: false,
            has_mcp_context: !ctx.tools.is_empty(),
            has_rag_context: ctx.request.flags.enable_rag && !ctx.retrieved_memories.is_empty(),
            has_memory_context: !ctx.memory_block.is_empty(),
            rag_docs_count: 0,
            mcp_tools_count: ctx.tools.len(),
            created_at: Utc::now(),
        };
        self.store
            .record_prompt_usage(&row)
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }
}
