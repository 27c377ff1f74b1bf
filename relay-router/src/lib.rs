#![deny(missing_docs)]
//! Smart model routing.
//!
//! Discovery builds a process-wide capability catalog; per request, the
//! router analyzes the messages, filters candidates by hard requirements,
//! scores the survivors under the user's cost/quality slider, and returns
//! the winner with up to three alternates. The tiered function-calling
//! router sits in front of it, deciding whether tools are needed at all
//! and which cost tier to target.

pub mod analysis;
pub mod catalog;
pub mod scoring;
pub mod tiered;

use std::sync::Arc;

use relay_types::{Message, SliderConfig, ToolSchema};

pub use analysis::{LONG_CONVERSATION_TOKENS, RequestAnalysis, analyze};
pub use catalog::{ModelCatalog, capability_description, infer_profile};
pub use scoring::{
    Alternate, FC_ACCURACY_FLOOR, RoutingDecision, filter_candidates, score_model, select,
};
pub use tiered::{STRIP_SAVINGS_ESTIMATE, TieredDecision, TieredRouter};

/// Errors from routing.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// The catalog has no available chat model.
    #[error("no model available")]
    NoModelAvailable,
}

/// The smart router: analysis + catalog + scoring.
pub struct SmartRouter {
    catalog: Arc<ModelCatalog>,
}

impl SmartRouter {
    /// Build a router over the shared catalog.
    #[must_use]
    pub fn new(catalog: Arc<ModelCatalog>) -> Self {
        Self { catalog }
    }

    /// The catalog behind this router.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    /// Route one request.
    pub async fn route(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        slider: &SliderConfig,
    ) -> Result<RoutingDecision, RoutingError> {
        let analysis = analyze(messages, tools);
        let profiles = self.catalog.available().await;
        let candidates = filter_candidates(&profiles, &analysis);
        let decision =
            select(candidates, &analysis, slider).ok_or(RoutingError::NoModelAvailable)?;
        tracing::debug!(
            model = %decision.model_id,
            score = decision.score,
            "relay.router.selected"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_providers::{ModelListing, ProviderManager};
    use relay_types::{GatewayConfig, ProviderType, SliderSource};

    async fn catalog_with(ids: &[&str]) -> Arc<ModelCatalog> {
        let manager = Arc::new(ProviderManager::with_providers(
            vec![],
            &GatewayConfig::default(),
        ));
        let catalog = Arc::new(ModelCatalog::new(manager));
        for id in ids {
            let listing = ModelListing {
                id: (*id).to_string(),
                name: (*id).to_string(),
                provider: "azure-eastus".into(),
            };
            catalog
                .upsert(infer_profile(&listing, ProviderType::AzureOpenai))
                .await;
        }
        catalog
    }

    #[test]
    fn slider_weights_always_sum_to_one() {
        for position in 0..=100u8 {
            let slider = SliderConfig::from_position(position, SliderSource::Request);
            assert!((slider.cost_weight + slider.quality_weight - 1.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn empty_catalog_routes_to_nothing() {
        let catalog = catalog_with(&[]).await;
        let router = SmartRouter::new(catalog);
        let err = router
            .route(&[Message::user("hi")], &[], &SliderConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::NoModelAvailable));
    }

    #[tokio::test]
    async fn tool_requests_route_to_high_accuracy_models() {
        let catalog = catalog_with(&["gpt-4o", "gpt-4o-mini", "llama3.1-8b"]).await;
        let router = SmartRouter::new(catalog);
        let tools = vec![ToolSchema {
            name: "azure.subscription_list".into(),
            description: "List subscriptions".into(),
            parameters: serde_json::json!({}),
        }];

        let decision = router
            .route(
                &[Message::user("list my azure subscriptions")],
                &tools,
                &SliderConfig::from_position(50, SliderSource::Request),
            )
            .await
            .unwrap();
        // llama (0.80) is filtered by the accuracy floor.
        assert!(decision.model_id.starts_with("gpt-4o"));
    }

    #[tokio::test]
    async fn cheap_slider_without_tools_picks_the_mini() {
        let catalog = catalog_with(&["gpt-4o", "gpt-4o-mini"]).await;
        let router = SmartRouter::new(catalog);

        let decision = router
            .route(
                &[Message::user("hello there")],
                &[],
                &SliderConfig::from_position(5, SliderSource::Request),
            )
            .await
            .unwrap();
        assert_eq!(decision.model_id, "gpt-4o-mini");
        assert!(!decision.alternates.is_empty());
    }
}
