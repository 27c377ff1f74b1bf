//! Model capability profiles and routing preference types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The provider backends the gateway can front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// Azure OpenAI (chat-completions wire shape).
    AzureOpenai,
    /// Azure AI Foundry (Claude-style messages wire shape).
    AzureAiFoundry,
    /// AWS Bedrock (Converse wire shape).
    AwsBedrock,
    /// Google Vertex (Gemini wire shape).
    GoogleVertex,
    /// Local Ollama (native chat wire shape).
    Ollama,
}

impl ProviderType {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::AzureOpenai => "azure-openai",
            ProviderType::AzureAiFoundry => "azure-ai-foundry",
            ProviderType::AwsBedrock => "aws-bedrock",
            ProviderType::GoogleVertex => "google-vertex",
            ProviderType::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a model can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Supports chat completion.
    pub chat: bool,
    /// Supports function calling.
    pub function_calling: bool,
    /// Observed function-calling accuracy in `[0, 1]`.
    pub function_calling_accuracy: f64,
    /// Accepts image input.
    pub vision: bool,
    /// Generates images.
    pub image_generation: bool,
    /// Produces embeddings.
    pub embeddings: bool,
    /// Supports streamed output.
    pub streaming: bool,
    /// Supports JSON-object response mode.
    pub json_mode: bool,
    /// Supports schema-constrained output.
    pub structured_output: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            chat: true,
            function_calling: false,
            function_calling_accuracy: 0.70,
            vision: false,
            image_generation: false,
            embeddings: false,
            streaming: true,
            json_mode: false,
            structured_output: false,
        }
    }
}

/// Observed performance characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    /// Maximum context window in tokens.
    pub max_context_tokens: u64,
    /// Maximum output tokens.
    pub max_output_tokens: u64,
    /// Average end-to-end latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Observed generation speed.
    pub tokens_per_second: f64,
}

impl Default for ModelPerformance {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            max_output_tokens: 4_096,
            avg_latency_ms: 500.0,
            tokens_per_second: 50.0,
        }
    }
}

/// Per-1k-token pricing attached to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    /// Price per 1k input tokens.
    pub input_per_1k_tokens: Decimal,
    /// Price per 1k output tokens.
    pub output_per_1k_tokens: Decimal,
    /// ISO currency code.
    pub currency: String,
}

impl Default for ModelCost {
    fn default() -> Self {
        Self {
            input_per_1k_tokens: Decimal::ZERO,
            output_per_1k_tokens: Decimal::ZERO,
            currency: "USD".into(),
        }
    }
}

/// Descriptive metadata for a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model family (e.g. `gpt-4o`, `claude`, `gemini`).
    pub family: String,
    /// Version string parsed from the id, if any.
    pub version: Option<String>,
    /// Free-form specialization labels.
    pub specializations: Vec<String>,
    /// When capabilities were last verified.
    pub last_tested: Option<DateTime<Utc>>,
    /// Whether the model answered its last listing/probe.
    pub is_available: bool,
}

/// One entry in the process-wide model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Model identifier as the provider reports it.
    pub model_id: String,
    /// Provider instance name.
    pub provider: String,
    /// Provider backend type.
    pub provider_type: ProviderType,
    /// Capability flags.
    pub capabilities: ModelCapabilities,
    /// Performance characteristics.
    pub performance: ModelPerformance,
    /// Pricing.
    pub cost: ModelCost,
    /// Descriptive metadata.
    pub metadata: ModelMetadata,
    /// Capability-description embedding for similarity search, if computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Where a slider configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliderSource {
    /// Per-request override.
    Request,
    /// Stored user preference.
    UserPreference,
    /// Process default.
    Default,
}

/// User-facing cost/quality preference, mapped to scoring weights.
///
/// Invariant: `cost_weight + quality_weight == 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliderConfig {
    /// Slider position in `[0, 100]`; 0 = cheapest, 100 = highest quality.
    pub position: u8,
    /// Weight on cost terms in `[0, 1]`.
    pub cost_weight: f64,
    /// Weight on quality terms in `[0, 1]`.
    pub quality_weight: f64,
    /// Whether extended thinking is allowed.
    pub enable_thinking: bool,
    /// Whether cascading (cheap-first retry) is allowed.
    pub enable_cascading: bool,
    /// Token budget for thinking when enabled.
    pub max_thinking_budget: u32,
    /// Where this configuration came from.
    pub source: SliderSource,
}

impl SliderConfig {
    /// Build a slider config from a position, deriving the weights.
    #[must_use]
    pub fn from_position(position: u8, source: SliderSource) -> Self {
        let position = position.min(100);
        let quality_weight = f64::from(position) / 100.0;
        Self {
            position,
            cost_weight: 1.0 - quality_weight,
            quality_weight,
            enable_thinking: position > 60,
            enable_cascading: position <= 40,
            max_thinking_budget: 10_000,
            source,
        }
    }
}

impl Default for SliderConfig {
    fn default() -> Self {
        Self::from_position(50, SliderSource::Default)
    }
}

/// The cost tier targeted by the tiered function-calling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Cheapest configured model.
    Cheap,
    /// Mid-tier model.
    Balanced,
    /// Highest-quality model.
    Premium,
}

/// Configuration for the tiered function-calling decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredFcConfig {
    /// Model backing the cheap tier; `None` defers to the smart router.
    pub cheap_model: Option<String>,
    /// Model backing the balanced tier.
    pub balanced_model: Option<String>,
    /// Model backing the premium tier.
    pub premium_model: Option<String>,
    /// Whether the tool catalog may be stripped from pure-chat turns.
    pub tool_stripping_enabled: bool,
    /// Whether decisions are cached.
    pub decision_cache_enabled: bool,
    /// Decision cache TTL in seconds.
    pub decision_cache_ttl_seconds: u64,
}

impl Default for TieredFcConfig {
    fn default() -> Self {
        Self {
            cheap_model: None,
            balanced_model: None,
            premium_model: None,
            tool_stripping_enabled: true,
            decision_cache_enabled: true,
            decision_cache_ttl_seconds: 300,
        }
    }
}
