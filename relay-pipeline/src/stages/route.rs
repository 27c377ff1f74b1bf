//! Model selection.

use std::sync::Arc;

use async_trait::async_trait;

use relay_router::{RoutingDecision, SmartRouter};
use relay_types::{ErrorKind, GatewayError};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};
use crate::stages::tool_schemas;

/// Resolves the model for the turn.
///
/// A tiered-FC tier with a configured model short-circuits the smart
/// router; otherwise the router scores the catalog under the turn's
/// slider.
pub struct RouteStage {
    router: Arc<SmartRouter>,
}

impl RouteStage {
    /// Build the stage over the smart router.
    #[must_use]
    pub fn new(router: Arc<SmartRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Stage for RouteStage {
    fn name(&self) -> &'static str {
        "route"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        if let Some(model_id) = ctx.tiered.as_ref().and_then(|t| t.model.clone()) {
            let provider = self
                .router
                .catalog()
                .get(&model_id)
                .await
                .map(|p| p.provider)
                .unwrap_or_default();
            ctx.routing = Some(RoutingDecision {
                model_id,
                provider,
                score: 0.0,
                reasons: vec!["tier override".into()],
                alternates: vec![],
            });
            return Ok(());
        }

        let schemas = tool_schemas(ctx);
        let decision = self
            .router
            .route(&ctx.request.messages, &schemas, &ctx.slider)
            .await
            .map_err(|e| GatewayError::new(ErrorKind::ProviderUnavailable, e.to_string()))?;
        ctx.routing = Some(decision);
        Ok(())
    }
}
