//! Gateway configuration.
//!
//! Everything here deserializes from the deployment's config file with serde
//! defaults, so a minimal config enables one provider and nothing else.

use serde::{Deserialize, Serialize};

use crate::model::{ProviderType, TieredFcConfig};

/// How the provider manager picks among healthy providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    /// Highest priority first, failover down the list.
    Priority,
    /// Rotate across healthy providers.
    RoundRobin,
    /// Pick the lowest observed average latency.
    LeastLatency,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::Priority
    }
}

/// Configuration for one provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Instance name (unique across the fleet).
    pub name: String,
    /// Backend type.
    pub provider_type: ProviderType,
    /// Whether the instance participates in routing.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Selection priority; lower is tried first.
    #[serde(default)]
    pub priority: i32,
    /// Base endpoint URL.
    pub endpoint: String,
    /// API key or bearer token.
    #[serde(default)]
    pub api_key: String,
    /// Provider-specific deployment/region hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// KV cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Default TTL in seconds for cached values.
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_seconds: u64,
    /// Prefix prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_cache_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Memory subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// FIFO cap on session-band entries.
    #[serde(default = "default_max_session_memory")]
    pub max_session_memory: usize,
    /// Cap on user-band entries.
    #[serde(default = "default_max_user_memory")]
    pub max_user_memory: usize,
    /// Total entry count that triggers consolidation.
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: usize,
    /// Days low-importance entries are retained.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_session_memory: default_max_session_memory(),
            max_user_memory: default_max_user_memory(),
            consolidation_threshold: default_consolidation_threshold(),
            retention_days: default_retention_days(),
        }
    }
}

/// Embedding model configuration; vector collections derive their dimension
/// from here rather than assuming a per-provider constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    pub model: String,
    /// Output dimension of the configured model.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model: "text-embedding-3-small".into(), dimension: 1536 }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Name of the provider used when routing expresses no preference.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Whether failed provider calls advance to the next candidate.
    #[serde(default = "default_true")]
    pub enable_failover: bool,
    /// Budget for one failover chain, in milliseconds.
    #[serde(default = "default_failover_timeout_ms")]
    pub failover_timeout_ms: u64,
    /// Whether load balancing is active (off = always priority order).
    #[serde(default)]
    pub enable_load_balancing: bool,
    /// Strategy used when load balancing is active.
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,
    /// Provider fleet.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Tiered function-calling configuration.
    #[serde(default)]
    pub tiered_fc: TieredFcConfig,
    /// KV cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// TTL in seconds for cached RAG results.
    #[serde(default = "default_rag_cache_ttl")]
    pub rag_cache_ttl_seconds: u64,
    /// Memory subsystem configuration.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Embedding model configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            enable_failover: true,
            failover_timeout_ms: default_failover_timeout_ms(),
            enable_load_balancing: false,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            providers: Vec::new(),
            tiered_fc: TieredFcConfig::default(),
            cache: CacheConfig::default(),
            rag_cache_ttl_seconds: default_rag_cache_ttl(),
            memory: MemoryConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_key_prefix() -> String {
    "relay".into()
}

fn default_max_session_memory() -> usize {
    50
}

fn default_max_user_memory() -> usize {
    200
}

fn default_consolidation_threshold() -> usize {
    100
}

fn default_retention_days() -> i64 {
    30
}

fn default_failover_timeout_ms() -> u64 {
    30_000
}

fn default_rag_cache_ttl() -> u64 {
    900
}
