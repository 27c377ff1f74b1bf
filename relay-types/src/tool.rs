//! Tool descriptors, server records, and access policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An indexed tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Dotted id: `<server>.<name>`.
    pub id: String,
    /// The server exposing the tool.
    pub server_id: String,
    /// Tool name on its server.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: serde_json::Value,
    /// Search tags generated at index time. Never contain the literal name.
    pub tags: Vec<String>,
}

impl ToolDescriptor {
    /// Compose the dotted tool id.
    #[must_use]
    pub fn dotted_id(server_id: &str, name: &str) -> String {
        format!("{server_id}.{name}")
    }
}

/// Runtime health of an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Reachable and serving tools.
    Online,
    /// Configured but not currently reachable.
    Offline,
    /// Never probed.
    Unknown,
}

/// Runtime state for one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    /// Server identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the server is administratively enabled.
    pub enabled: bool,
    /// Tools indexed from this server.
    pub tools: Vec<ToolDescriptor>,
    /// Last observed status.
    pub status: ServerStatus,
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Grant access.
    Allow,
    /// Refuse access.
    Deny,
}

/// A `(server, group)` access rule. Lower priority wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Policy identifier.
    pub id: String,
    /// The server the rule applies to.
    pub server_id: String,
    /// Directory group id the rule matches.
    pub group_id: String,
    /// Display name of the group.
    pub group_name: String,
    /// Allow or deny.
    pub access_type: AccessType,
    /// Precedence; lower values are evaluated first.
    pub priority: i32,
    /// Whether the rule participates in resolution.
    pub is_enabled: bool,
    /// Creation time; tiebreaker after priority.
    pub created_at: DateTime<Utc>,
}

/// Which population a default policy covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicyType {
    /// Applies to admins with no explicit policy match.
    AdminDefault,
    /// Applies to regular users with no explicit policy match.
    UserDefault,
}

/// Fallback decision when no explicit policy matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultPolicy {
    /// Which population this default covers.
    pub policy_type: DefaultPolicyType,
    /// The fallback decision.
    pub default_access: AccessType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_id_shape() {
        assert_eq!(
            ToolDescriptor::dotted_id("azure", "subscription_list"),
            "azure.subscription_list"
        );
    }

    #[test]
    fn access_type_wire_names() {
        assert_eq!(serde_json::to_string(&AccessType::Allow).unwrap(), "\"allow\"");
        assert_eq!(serde_json::to_string(&AccessType::Deny).unwrap(), "\"deny\"");
    }

    #[test]
    fn policy_roundtrip() {
        let policy = AccessPolicy {
            id: "p-1".into(),
            server_id: "azure".into(),
            group_id: "g-1".into(),
            group_name: "az-users".into(),
            access_type: AccessType::Allow,
            priority: 10,
            is_enabled: true,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&policy).unwrap();
        let back: AccessPolicy = serde_json::from_value(v).unwrap();
        assert_eq!(back, policy);
    }
}
