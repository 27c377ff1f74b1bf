//! The tool-orchestrator client.
//!
//! Tool execution leaves the gateway through this seam. The orchestrator
//! service owns the actual MCP connections; the gateway only consumes its
//! HTTP interface: list servers, list a server's tools, execute one tool.

use async_trait::async_trait;
use serde::Deserialize;

use relay_types::McpError;

/// One server as the orchestrator reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    /// Server identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// One tool as the orchestrator reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolInfo {
    /// Tool name on its server.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's input.
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Client interface to the tool orchestrator.
#[async_trait]
pub trait ToolOrchestrator: Send + Sync {
    /// List configured servers.
    async fn list_servers(&self) -> Result<Vec<ServerInfo>, McpError>;

    /// List one server's tools.
    async fn get_server_tools(&self, server_id: &str) -> Result<Vec<ToolInfo>, McpError>;

    /// Execute one tool and return its JSON response.
    async fn execute_tool(
        &self,
        server_id: &str,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, McpError>;
}

/// HTTP implementation of [`ToolOrchestrator`].
pub struct HttpToolOrchestrator {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpToolOrchestrator {
    /// Build a client for the orchestrator at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, McpError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Orchestrator(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl ToolOrchestrator for HttpToolOrchestrator {
    async fn list_servers(&self) -> Result<Vec<ServerInfo>, McpError> {
        let response = self
            .request(self.client.get(format!("{}/servers", self.base_url)))
            .send()
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))
    }

    async fn get_server_tools(&self, server_id: &str) -> Result<Vec<ToolInfo>, McpError> {
        let response = self
            .request(
                self.client
                    .get(format!("{}/servers/{server_id}/tools", self.base_url)),
            )
            .send()
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))
    }

    async fn execute_tool(
        &self,
        server_id: &str,
        operation: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let response = self
            .request(self.client.post(format!(
                "{}/servers/{server_id}/tools/{operation}/execute",
                self.base_url
            )))
            .json(params)
            .send()
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))?;
        let response = Self::check(response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| McpError::Orchestrator(e.to_string()))?;
        // Tool responses are JSON; a body that fails to parse degrades to
        // the empty object rather than failing the execution.
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
            tracing::warn!(server = server_id, tool = operation, "relay.mcp.unparseable_result");
            serde_json::Value::Object(serde_json::Map::new())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_servers_and_tools() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/servers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "azure", "name": "Azure Tools"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/servers/azure/tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "subscription_list", "description": "List subscriptions",
                 "input_schema": {"type": "object"}}
            ])))
            .mount(&server)
            .await;

        let client = HttpToolOrchestrator::new(server.uri());
        let servers = client.list_servers().await.unwrap();
        assert_eq!(servers[0].id, "azure");
        let tools = client.get_server_tools("azure").await.unwrap();
        assert_eq!(tools[0].name, "subscription_list");
    }

    #[tokio::test]
    async fn execute_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers/azure/tools/subscription_list/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"subs": ["a"]})))
            .mount(&server)
            .await;

        let client = HttpToolOrchestrator::new(server.uri());
        let result = client
            .execute_tool("azure", "subscription_list", &json!({}))
            .await
            .unwrap();
        assert_eq!(result, json!({"subs": ["a"]}));
    }

    #[tokio::test]
    async fn unparseable_result_degrades_to_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers/azure/tools/broken/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&server)
            .await;

        let client = HttpToolOrchestrator::new(server.uri());
        let result = client.execute_tool("azure", "broken", &json!({})).await.unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn orchestrator_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/servers/azure/tools/boom/execute"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpToolOrchestrator::new(server.uri());
        let err = client.execute_tool("azure", "boom", &json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Orchestrator(_)));
    }
}
