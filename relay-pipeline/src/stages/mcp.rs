//! Tool discovery and policy filtering.

use std::sync::Arc;

use async_trait::async_trait;

use relay_mcp::ToolAccess;
use relay_types::GatewayError;

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};

/// Fills the turn's tool catalog with the tools the user may see.
pub struct McpStage {
    access: Arc<ToolAccess>,
}

impl McpStage {
    /// Build the stage over the tool access layer.
    #[must_use]
    pub fn new(access: Arc<ToolAccess>) -> Self {
        Self { access }
    }
}

#[async_trait]
impl Stage for McpStage {
    fn name(&self) -> &'static str {
        "mcp"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::WarnAndContinue
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        _events: &EventSink,
    ) -> Result<(), GatewayError> {
        if !ctx.request.flags.enable_mcp {
            ctx.tools.clear();
            return Ok(());
        }
        let Some(user) = &ctx.user else {
            return Ok(());
        };
        ctx.tools = self.access.tools_for_user(user).await;
        tracing::debug!(tools = ctx.tools.len(), "relay.pipeline.tools_filtered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use relay_mcp::{
        InMemoryPolicyStore, ServerInfo, ServerRegistry, ToolInfo, ToolOrchestrator,
    };
    use relay_store::{CacheClient, MemoryBackend};
    use relay_types::{
        AccessType, CacheConfig, DefaultPolicy, DefaultPolicyType, GatewayRequest, McpError,
        Message, User,
    };

    struct FakeOrchestrator;

    #[async_trait]
    impl ToolOrchestrator for FakeOrchestrator {
        async fn list_servers(&self) -> Result<Vec<ServerInfo>, McpError> {
            Ok(vec![ServerInfo { id: "azure".into(), name: "Azure".into() }])
        }

        async fn get_server_tools(&self, _server_id: &str) -> Result<Vec<ToolInfo>, McpError> {
            Ok(vec![ToolInfo {
                name: "subscription_list".into(),
                description: "List subscriptions".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }])
        }

        async fn execute_tool(
            &self,
            _server_id: &str,
            _operation: &str,
            _params: &serde_json::Value,
        ) -> Result<serde_json::Value, McpError> {
            Ok(serde_json::json!({}))
        }
    }

    async fn access(default_access: AccessType) -> Arc<ToolAccess> {
        let cache = CacheClient::new(Arc::new(MemoryBackend::new()), &CacheConfig::default());
        let orchestrator = Arc::new(FakeOrchestrator);
        let registry = Arc::new(ServerRegistry::new(orchestrator.clone(), cache));
        registry.discover().await.unwrap();
        let store = Arc::new(InMemoryPolicyStore::new());
        store.set_default(DefaultPolicy {
            policy_type: DefaultPolicyType::UserDefault,
            default_access,
        });
        Arc::new(ToolAccess::new(registry, store, orchestrator))
    }

    fn ctx() -> PipelineContext {
        let mut ctx = PipelineContext::new(GatewayRequest {
            user_id: "u-1".into(),
            session_id: "s-1".into(),
            messages: vec![Message::user("list subscriptions")],
            flags: Default::default(),
        });
        ctx.user = Some(User {
            id: "u-1".into(),
            email: "u@example.com".into(),
            name: "U".into(),
            groups: vec![],
            is_admin: false,
            created_at: Utc::now(),
        });
        ctx
    }

    #[tokio::test]
    async fn allowed_user_sees_tools() {
        let stage = McpStage::new(access(AccessType::Allow).await);
        let (sink, _rx) = EventSink::new();
        let mut ctx = ctx();
        stage.run(&mut ctx, &sink).await.unwrap();
        assert_eq!(ctx.tools.len(), 1);
        assert_eq!(ctx.tools[0].id, "azure.subscription_list");
    }

    #[tokio::test]
    async fn denied_user_sees_nothing() {
        let stage = McpStage::new(access(AccessType::Deny).await);
        let (sink, _rx) = EventSink::new();
        let mut ctx = ctx();
        stage.run(&mut ctx, &sink).await.unwrap();
        assert!(ctx.tools.is_empty());
    }

    #[tokio::test]
    async fn disabled_flag_clears_tools() {
        let stage = McpStage::new(access(AccessType::Allow).await);
        let (sink, _rx) = EventSink::new();
        let mut ctx = ctx();
        ctx.request.flags.enable_mcp = false;
        stage.run(&mut ctx, &sink).await.unwrap();
        assert!(ctx.tools.is_empty());
    }
}
