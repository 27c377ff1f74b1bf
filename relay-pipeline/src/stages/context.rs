//! Context assembly.

use std::sync::Arc;

use async_trait::async_trait;

use relay_context::{AssembleRequest, ContextAssembler, ContextError};
use relay_router::ModelCatalog;
use relay_types::{GatewayError, ModelProfile};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};

/// Assembles the turn's augmented context.
///
/// Routing hasn't run yet at this point in the pipeline, so the context is
/// sized against a provisional model: the configured default when set,
/// otherwise the largest-window chat model in the catalog. A catalog
/// that's still empty falls back to a synthetic default profile; the
/// router will fail the turn properly if nothing is actually available.
pub struct ContextStage {
    assembler: Arc<ContextAssembler>,
    catalog: Arc<ModelCatalog>,
    system_prompt: String,
    default_model: Option<String>,
}

impl ContextStage {
    /// Build the stage.
    #[must_use]
    pub fn new(
        assembler: Arc<ContextAssembler>,
        catalog: Arc<ModelCatalog>,
        system_prompt: impl Into<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            assembler,
            catalog,
            system_prompt: system_prompt.into(),
            default_model,
        }
    }

    async fn provisional_model(&self) -> ModelProfile {
        if let Some(model_id) = &self.default_model {
            if let Some(profile) = self.catalog.get(model_id).await {
                return profile;
            }
        }
        self.catalog
            .available()
            .await
            .into_iter()
            .filter(|p| p.capabilities.chat)
            .max_by(|a, b| {
                a.performance
                    .max_context_tokens
                    .cmp(&b.performance.max_context_tokens)
                    .then(b.model_id.cmp(&a.model_id))
            })
            .unwrap_or_else(|| ModelProfile {
                model_id: "default".into(),
                provider: String::new(),
                provider_type: relay_types::ProviderType::AzureOpenai,
                capabilities: Default::default(),
                performance: Default::default(),
                cost: Default::default(),
                metadata: Default::default(),
                embedding: None,
            })
    }
}

#[async_trait]
impl Stage for ContextStage {
    fn name(&self) -> &'static str {
        "context"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        let model = self.provisional_model().await;

        let system_prompt = if ctx.memory_block.is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, ctx.memory_block)
        };

        let augmented = self
            .assembler
            .assemble(AssembleRequest {
                user_id: &ctx.request.user_id,
                messages: &ctx.request.messages,
                model: &model,
                system_prompt: &system_prompt,
                memories: &ctx.retrieved_memories,
                cache_enabled: ctx.request.flags.cache_enabled,
            })
            .await
            .map_err(|error| match error {
                ContextError::InvalidUser(m) | ContextError::InvalidModel(m) => {
                    GatewayError::invalid_input(m)
                }
            })?;

        tracing::debug!(
            tokens = augmented.total_tokens,
            cache_hit = augmented.cache_hit,
            "relay.pipeline.context_assembled"
        );
        ctx.augmented = Some(augmented);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_context::ContextCache;
    use relay_providers::ProviderManager;
    use relay_store::{CacheClient, MemoryBackend};
    use relay_types::{CacheConfig, GatewayConfig, GatewayRequest, Message};

    fn stage(default_model: Option<String>) -> ContextStage {
        let cache = CacheClient::new(Arc::new(MemoryBackend::new()), &CacheConfig::default());
        let assembler = Arc::new(ContextAssembler::new(ContextCache::new(cache)));
        let manager = Arc::new(ProviderManager::with_providers(
            vec![],
            &GatewayConfig::default(),
        ));
        let catalog = Arc::new(ModelCatalog::new(manager));
        ContextStage::new(assembler, catalog, "You are a cloud assistant.", default_model)
    }

    fn ctx(messages: Vec<Message>) -> PipelineContext {
        PipelineContext::new(GatewayRequest {
            user_id: "u-1".into(),
            session_id: "s-1".into(),
            messages,
            flags: Default::default(),
        })
    }

    #[tokio::test]
    async fn assembles_with_synthetic_default_when_catalog_empty() {
        let stage = stage(None);
        let (sink, _rx) = EventSink::new();
        let mut ctx = ctx(vec![Message::user("hello there")]);
        stage.run(&mut ctx, &sink).await.unwrap();
        let augmented = ctx.augmented.unwrap();
        assert!(!augmented.cache_hit);
        assert!(augmented.total_tokens > 0);
    }

    #[tokio::test]
    async fn memory_block_joins_the_system_prompt() {
        let stage = stage(None);
        let (sink, _rx) = EventSink::new();
        let mut ctx = ctx(vec![Message::user("hello")]);
        ctx.memory_block = "### User History\n- prefers terse answers".into();
        stage.run(&mut ctx, &sink).await.unwrap();
        assert!(
            ctx.augmented
                .unwrap()
                .system_prompt
                .contains("prefers terse answers")
        );
    }

    #[tokio::test]
    async fn empty_messages_still_assemble() {
        let stage = stage(None);
        let (sink, _rx) = EventSink::new();
        let mut ctx = ctx(vec![]);
        stage.run(&mut ctx, &sink).await.unwrap();
        assert!(ctx.augmented.unwrap().context_prompt.is_empty());
    }
}
