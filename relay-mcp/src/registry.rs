//! Runtime server registry.
//!
//! Discovery pulls the server list and each server's tools from the
//! orchestrator, indexes tags, and records runtime status. The
//! administrative enabled flag lives in the KV store under
//! `mcp:<server_id>:enabled` so it survives restarts; absence means
//! enabled.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use relay_store::CacheClient;
use relay_types::{McpError, McpServer, ServerStatus, ToolDescriptor};

use crate::client::ToolOrchestrator;
use crate::index::index_tool;

/// Discovered servers and their indexed tools.
pub struct ServerRegistry {
    orchestrator: Arc<dyn ToolOrchestrator>,
    cache: CacheClient,
    servers: RwLock<HashMap<String, McpServer>>,
}

impl ServerRegistry {
    /// Build a registry over an orchestrator client and the KV cache.
    #[must_use]
    pub fn new(orchestrator: Arc<dyn ToolOrchestrator>, cache: CacheClient) -> Self {
        Self {
            orchestrator,
            cache,
            servers: RwLock::new(HashMap::new()),
        }
    }

    fn enabled_key(server_id: &str) -> String {
        format!("mcp:{server_id}:enabled")
    }

    /// Discover servers and tools. Returns the number of servers indexed.
    ///
    /// A server whose tool listing fails is recorded as `Offline` with no
    /// tools rather than failing discovery.
    pub async fn discover(&self) -> Result<usize, McpError> {
        let listed = self.orchestrator.list_servers().await?;
        let mut servers = HashMap::with_capacity(listed.len());

        for info in listed {
            let enabled = self
                .cache
                .get::<bool>(&Self::enabled_key(&info.id))
                .await
                .unwrap_or(None)
                .unwrap_or(true);

            let (tools, status) = match self.orchestrator.get_server_tools(&info.id).await {
                Ok(tools) => {
                    let indexed = tools
                        .into_iter()
                        .map(|tool| {
                            index_tool(&info.id, &tool.name, &tool.description, tool.input_schema)
                        })
                        .collect::<Vec<_>>();
                    (indexed, ServerStatus::Online)
                }
                Err(error) => {
                    tracing::warn!(
                        server = %info.id,
                        error = %error,
                        "relay.mcp.tool_listing_failed"
                    );
                    (Vec::new(), ServerStatus::Offline)
                }
            };

            servers.insert(
                info.id.clone(),
                McpServer {
                    id: info.id,
                    name: info.name,
                    enabled,
                    tools,
                    status,
                },
            );
        }

        let count = servers.len();
        *self.servers.write().await = servers;
        tracing::info!(servers = count, "relay.mcp.discovered");
        Ok(count)
    }

    /// Look up one server.
    pub async fn get(&self, server_id: &str) -> Option<McpServer> {
        self.servers.read().await.get(server_id).cloned()
    }

    /// Whether a server was present at the last discovery.
    pub async fn is_configured(&self, server_id: &str) -> bool {
        self.servers.read().await.contains_key(server_id)
    }

    /// Flip a server's administrative enabled flag and persist it.
    pub async fn set_enabled(&self, server_id: &str, enabled: bool) -> Result<(), McpError> {
        self.cache
            .set(&Self::enabled_key(server_id), &enabled, None)
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))?;
        if let Some(server) = self.servers.write().await.get_mut(server_id) {
            server.enabled = enabled;
        }
        Ok(())
    }

    /// Every tool on enabled, online servers.
    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        let servers = self.servers.read().await;
        let mut tools: Vec<ToolDescriptor> = servers
            .values()
            .filter(|s| s.enabled)
            .flat_map(|s| s.tools.iter().cloned())
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ServerInfo, ToolInfo};
    use async_trait::async_trait;
    use relay_store::MemoryBackend;
    use relay_types::CacheConfig;

    struct FakeOrchestrator;

    #[async_trait]
    impl ToolOrchestrator for FakeOrchestrator {
        async fn list_servers(&self) -> Result<Vec<ServerInfo>, McpError> {
            Ok(vec![
                ServerInfo { id: "azure".into(), name: "Azure".into() },
                ServerInfo { id: "flaky".into(), name: "Flaky".into() },
            ])
        }

        async fn get_server_tools(&self, server_id: &str) -> Result<Vec<ToolInfo>, McpError> {
            match server_id {
                "azure" => Ok(vec![ToolInfo {
                    name: "subscription_list".into(),
                    description: "List subscriptions".into(),
                    input_schema: serde_json::json!({"type": "object"}),
                }]),
                _ => Err(McpError::Orchestrator("unreachable".into())),
            }
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

    fn cache() -> CacheClient {
        CacheClient::new(Arc::new(MemoryBackend::new()), &CacheConfig::default())
    }

    #[tokio::test]
    async fn discovery_indexes_tools_and_marks_failures_offline() {
        let registry = ServerRegistry::new(Arc::new(FakeOrchestrator), cache());
        assert_eq!(registry.discover().await.unwrap(), 2);

        let azure = registry.get("azure").await.unwrap();
        assert_eq!(azure.status, ServerStatus::Online);
        assert_eq!(azure.tools[0].id, "azure.subscription_list");
        assert!(!azure.tools[0].tags.is_empty());

        let flaky = registry.get("flaky").await.unwrap();
        assert_eq!(flaky.status, ServerStatus::Offline);
        assert!(flaky.tools.is_empty());
    }

    #[tokio::test]
    async fn enabled_flag_survives_rediscovery() {
        let shared_cache = cache();
        let registry = ServerRegistry::new(Arc::new(FakeOrchestrator), shared_cache.clone());
        registry.discover().await.unwrap();
        registry.set_enabled("azure", false).await.unwrap();

        // A fresh registry over the same cache sees the persisted flag.
        let registry2 = ServerRegistry::new(Arc::new(FakeOrchestrator), shared_cache);
        registry2.discover().await.unwrap();
        assert!(!registry2.get("azure").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn all_tools_skips_disabled_servers() {
        let registry = ServerRegistry::new(Arc::new(FakeOrchestrator), cache());
        registry.discover().await.unwrap();
        assert_eq!(registry.all_tools().await.len(), 1);
        registry.set_enabled("azure", false).await.unwrap();
        assert!(registry.all_tools().await.is_empty());
    }
}
