//! Tool-server access control.
//!
//! Resolution order, per server: unconfigured servers are allowed
//! (explicit permissive mode), disabled servers are denied, then the
//! lowest-`(priority, created_at)` enabled policy matching one of the
//! user's groups decides, then the population default. Any store error
//! denies.

use std::sync::Arc;

use async_trait::async_trait;

use relay_types::{
    AccessPolicy, AccessType, DefaultPolicy, DefaultPolicyType, McpError, PersistError,
    ToolDescriptor, User,
};

use crate::client::ToolOrchestrator;
use crate::registry::ServerRegistry;

/// Read access to the persisted policy tables.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Policies for one server, unsorted.
    async fn policies_for_server(&self, server_id: &str)
    -> Result<Vec<AccessPolicy>, PersistError>;

    /// The default policy for a population, if configured.
    async fn default_policy(
        &self,
        policy_type: DefaultPolicyType,
    ) -> Result<Option<DefaultPolicy>, PersistError>;
}

/// In-memory [`PolicyStore`] for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: std::sync::RwLock<Vec<AccessPolicy>>,
    defaults: std::sync::RwLock<Vec<DefaultPolicy>>,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy.
    pub fn add_policy(&self, policy: AccessPolicy) {
        self.policies.write().unwrap_or_else(|e| e.into_inner()).push(policy);
    }

    /// Set a population default.
    pub fn set_default(&self, policy: DefaultPolicy) {
        let mut defaults = self.defaults.write().unwrap_or_else(|e| e.into_inner());
        defaults.retain(|d| d.policy_type != policy.policy_type);
        defaults.push(policy);
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn policies_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<AccessPolicy>, PersistError> {
        Ok(self
            .policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn default_policy(
        &self,
        policy_type: DefaultPolicyType,
    ) -> Result<Option<DefaultPolicy>, PersistError> {
        Ok(self
            .defaults
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|d| d.policy_type == policy_type)
            .cloned())
    }
}

/// Policy resolution and tool filtering.
pub struct AccessController {
    store: Arc<dyn PolicyStore>,
}

impl AccessController {
    /// Build a controller over a policy store.
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Whether `user` may reach `server_id`. Deterministic for a fixed
    /// policy table; store errors deny.
    pub async fn is_server_allowed(
        &self,
        user: &User,
        server_id: &str,
        registry: &ServerRegistry,
    ) -> bool {
        match self.resolve(user, server_id, registry).await {
            Ok(allowed) => allowed,
            Err(error) => {
                tracing::warn!(
                    server = server_id,
                    user = %user.id,
                    error = %error,
                    "relay.mcp.policy_lookup_failed, denying"
                );
                false
            }
        }
    }

    async fn resolve(
        &self,
        user: &User,
        server_id: &str,
        registry: &ServerRegistry,
    ) -> Result<bool, PersistError> {
        let Some(server) = registry.get(server_id).await else {
            // Permissive mode: servers outside the policy table are open.
            tracing::debug!(server = server_id, "relay.mcp.unconfigured_server_allowed");
            return Ok(true);
        };
        if !server.enabled {
            return Ok(false);
        }

        let mut matching: Vec<AccessPolicy> = self
            .store
            .policies_for_server(server_id)
            .await?
            .into_iter()
            .filter(|p| p.is_enabled && user.groups.contains(&p.group_id))
            .collect();
        matching.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        if let Some(decider) = matching.first() {
            return Ok(decider.access_type == AccessType::Allow);
        }

        let policy_type = if user.is_admin {
            DefaultPolicyType::AdminDefault
        } else {
            DefaultPolicyType::UserDefault
        };
        let default = self.store.default_policy(policy_type).await?;
        Ok(default.map(|d| d.default_access) == Some(AccessType::Allow))
    }

    /// Drop tools whose server the user may not reach.
    pub async fn filter_tools(
        &self,
        user: &User,
        tools: Vec<ToolDescriptor>,
        registry: &ServerRegistry,
    ) -> Vec<ToolDescriptor> {
        let mut allowed = Vec::with_capacity(tools.len());
        let mut decisions: std::collections::HashMap<String, bool> =
            std::collections::HashMap::new();
        for tool in tools {
            let verdict = match decisions.get(&tool.server_id) {
                Some(verdict) => *verdict,
                None => {
                    let verdict = self.is_server_allowed(user, &tool.server_id, registry).await;
                    decisions.insert(tool.server_id.clone(), verdict);
                    verdict
                }
            };
            if verdict {
                allowed.push(tool);
            }
        }
        allowed
    }
}

/// Filtered catalog access plus policy-checked execution.
pub struct ToolAccess {
    registry: Arc<ServerRegistry>,
    controller: AccessController,
    orchestrator: Arc<dyn ToolOrchestrator>,
}

impl ToolAccess {
    /// Wire the registry, policy store, and orchestrator together.
    #[must_use]
    pub fn new(
        registry: Arc<ServerRegistry>,
        store: Arc<dyn PolicyStore>,
        orchestrator: Arc<dyn ToolOrchestrator>,
    ) -> Self {
        Self {
            registry,
            controller: AccessController::new(store),
            orchestrator,
        }
    }

    /// The registry behind this access layer.
    #[must_use]
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// The tools `user` may see.
    pub async fn tools_for_user(&self, user: &User) -> Vec<ToolDescriptor> {
        let tools = self.registry.all_tools().await;
        self.controller.filter_tools(user, tools, &self.registry).await
    }

    /// Execute a dotted tool id, re-checking policy first.
    ///
    /// A turn that lost access between discovery and execution fails here
    /// with [`McpError::Denied`].
    pub async fn execute(
        &self,
        user: &User,
        tool_id: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let (server_id, operation) = tool_id
            .split_once('.')
            .ok_or_else(|| McpError::NotFound(format!("malformed tool id: {tool_id}")))?;
        if !self
            .controller
            .is_server_allowed(user, server_id, &self.registry)
            .await
        {
            return Err(McpError::Denied(tool_id.to_string()));
        }
        self.orchestrator.execute_tool(server_id, operation, params).await
    }
}
