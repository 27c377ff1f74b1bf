//! Tiered function-calling decision.

use std::sync::Arc;

use async_trait::async_trait;

use relay_router::TieredRouter;
use relay_types::GatewayError;

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};

/// Decides whether tools stay and which tier should serve the turn.
pub struct TieredStage {
    router: Arc<TieredRouter>,
}

impl TieredStage {
    /// Build the stage over the tiered router.
    #[must_use]
    pub fn new(router: Arc<TieredRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Stage for TieredStage {
    fn name(&self) -> &'static str {
        "tiered_fc"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        let message = ctx.latest_user_text();
        let decision = self.router.decide(&message, ctx.tools.len(), &ctx.slider);

        if decision.strip_tools {
            tracing::debug!(
                stripped = ctx.tools.len(),
                estimated_savings = ?decision.estimated_savings_tokens,
                "relay.pipeline.tools_stripped"
            );
            ctx.tools.clear();
        }
        ctx.tiered = Some(decision);
        Ok(())
    }
}
