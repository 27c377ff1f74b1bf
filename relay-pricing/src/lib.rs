#![deny(missing_docs)]
//! Model pricing and cost accounting.
//!
//! [`PricingService`] loads per-1k-token prices from a pricing feed at
//! startup, refreshes on an interval, and answers cost questions for the
//! metrics stage. Feed misses and fetch failures fall back to a
//! hand-maintained table, so cost computation never fails a turn.

pub mod normalize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub use normalize::normalize_model_id;

/// Where a price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PricingSource {
    /// Fetched from the live pricing feed.
    LiveApi,
    /// Hand-maintained fallback table.
    Fallback,
}

/// Pricing for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Normalized model id.
    pub model_id: String,
    /// Display name.
    pub model_name: String,
    /// Provider label from the feed.
    pub provider: String,
    /// Price per 1k input tokens, USD.
    pub input_price_per_1k: Decimal,
    /// Price per 1k output tokens, USD.
    pub output_price_per_1k: Decimal,
    /// Pricing region.
    pub region: String,
    /// When this entry was loaded.
    pub last_updated: DateTime<Utc>,
    /// Feed or fallback.
    pub source: PricingSource,
}

/// One cost computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Cost of the prompt tokens.
    pub input_cost: Decimal,
    /// Cost of the completion tokens.
    pub output_cost: Decimal,
    /// `input_cost + output_cost`.
    pub total_cost: Decimal,
    /// Where the underlying prices came from.
    pub source: PricingSource,
}

/// One row of the pricing feed's JSON document.
///
/// The feed returns `{"prices": [PriceFeedEntry, ...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceFeedEntry {
    /// Model id as the feed spells it.
    pub model_id: String,
    /// Display name.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Provider label.
    #[serde(default)]
    pub provider: Option<String>,
    /// Price per 1k input tokens.
    pub input_per_1k: Decimal,
    /// Price per 1k output tokens.
    pub output_per_1k: Decimal,
    /// Pricing region.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceFeedDocument {
    prices: Vec<PriceFeedEntry>,
}

/// Default pricing key used when a model misses both the feed and the table.
pub const DEFAULT_PRICING_KEY: &str = "default";

const COST_SCALE: u32 = 8;

/// Pricing lookup and cost computation.
pub struct PricingService {
    client: reqwest::Client,
    feed_url: Option<String>,
    region: String,
    live: RwLock<HashMap<String, ModelPricing>>,
    fallback: HashMap<String, ModelPricing>,
}

impl PricingService {
    /// Build a service that fetches from `feed_url`.
    #[must_use]
    pub fn new(feed_url: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            feed_url: Some(feed_url.into()),
            region: region.into(),
            live: RwLock::new(HashMap::new()),
            fallback: fallback_table(),
        }
    }

    /// Build a service with no feed; every lookup uses the fallback table.
    #[must_use]
    pub fn fallback_only(region: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            feed_url: None,
            region: region.into(),
            live: RwLock::new(HashMap::new()),
            fallback: fallback_table(),
        }
    }

    /// Fetch the feed and replace the live table.
    ///
    /// A failed fetch leaves the previous live table in place; lookups keep
    /// working off it or off the fallback table.
    pub async fn refresh(&self) -> Result<usize, PricingError> {
        let Some(url) = &self.feed_url else {
            return Ok(0);
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PricingError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PricingError::Fetch(format!("HTTP {}", response.status())));
        }
        let document: PriceFeedDocument = response
            .json()
            .await
            .map_err(|e| PricingError::Parse(e.to_string()))?;

        let now = Utc::now();
        let mut table = HashMap::with_capacity(document.prices.len());
        for entry in document.prices {
            let id = normalize_model_id(&entry.model_id);
            table.insert(
                id.clone(),
                ModelPricing {
                    model_name: entry.model_name.unwrap_or_else(|| id.clone()),
                    model_id: id,
                    provider: entry.provider.unwrap_or_default(),
                    input_price_per_1k: entry.input_per_1k,
                    output_price_per_1k: entry.output_per_1k,
                    region: entry.region.unwrap_or_else(|| self.region.clone()),
                    last_updated: now,
                    source: PricingSource::LiveApi,
                },
            );
        }
        let count = table.len();
        *self.live.write().await = table;
        tracing::info!(models = count, "relay.pricing.refreshed");
        Ok(count)
    }

    /// Spawn the 24-hour refresh loop. Abort the handle at shutdown.
    ///
    /// The first refresh is attempted immediately; failures are logged and
    /// retried at the next tick.
    pub fn start_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = service.refresh().await {
                    tracing::warn!(error = %e, "relay.pricing.refresh_failed");
                }
            }
        })
    }

    /// Look up pricing for a model, falling back to the table and then to
    /// the `default` entry.
    pub async fn get_pricing(&self, model_id: &str) -> ModelPricing {
        let id = normalize_model_id(model_id);
        if let Some(found) = self.live.read().await.get(&id) {
            return found.clone();
        }
        if let Some(found) = self.fallback.get(&id) {
            return found.clone();
        }
        self.fallback[DEFAULT_PRICING_KEY].clone()
    }

    /// Compute the cost of a completion, rounded to 8 decimals.
    pub async fn calculate_cost(
        &self,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        region: Option<&str>,
    ) -> CostBreakdown {
        let pricing = self.get_pricing(model_id).await;
        if let Some(region) = region {
            if region != pricing.region {
                tracing::debug!(
                    model = model_id,
                    requested = region,
                    priced = %pricing.region,
                    "relay.pricing.region_mismatch"
                );
            }
        }
        let thousand = Decimal::from(1000u32);
        let input_cost =
            (Decimal::from(input_tokens) / thousand * pricing.input_price_per_1k).round_dp(COST_SCALE);
        let output_cost = (Decimal::from(output_tokens) / thousand * pricing.output_price_per_1k)
            .round_dp(COST_SCALE);
        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            source: pricing.source,
        }
    }
}

/// Errors from the pricing feed.
#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    /// The HTTP fetch failed.
    #[error("pricing fetch failed: {0}")]
    Fetch(String),
    /// The feed document did not parse.
    #[error("pricing parse failed: {0}")]
    Parse(String),
}

fn fallback_entry(
    id: &str,
    provider: &str,
    input_per_1k: Decimal,
    output_per_1k: Decimal,
) -> (String, ModelPricing) {
    (
        id.to_string(),
        ModelPricing {
            model_id: id.to_string(),
            model_name: id.to_string(),
            provider: provider.to_string(),
            input_price_per_1k: input_per_1k,
            output_price_per_1k: output_per_1k,
            region: "us-east-1".to_string(),
            last_updated: DateTime::<Utc>::MIN_UTC,
            source: PricingSource::Fallback,
        },
    )
}

/// Hand-maintained prices, USD per 1k tokens.
fn fallback_table() -> HashMap<String, ModelPricing> {
    // Decimal::new(mantissa, scale): new(25, 5) == 0.00025.
    HashMap::from([
        fallback_entry("gpt-4o", "azure-openai", Decimal::new(250, 5), Decimal::new(1000, 5)),
        fallback_entry("gpt-4o-mini", "azure-openai", Decimal::new(15, 5), Decimal::new(60, 5)),
        fallback_entry("gpt-4.1", "azure-openai", Decimal::new(200, 5), Decimal::new(800, 5)),
        fallback_entry("gpt-4.1-mini", "azure-openai", Decimal::new(40, 5), Decimal::new(160, 5)),
        fallback_entry(
            "claude-sonnet-4-5",
            "aws-bedrock",
            Decimal::new(300, 5),
            Decimal::new(1500, 5),
        ),
        fallback_entry(
            "claude-haiku-4-5",
            "aws-bedrock",
            Decimal::new(25, 5),
            Decimal::new(125, 5),
        ),
        fallback_entry(
            "gemini-2.0-flash",
            "google-vertex",
            Decimal::new(10, 5),
            Decimal::new(40, 5),
        ),
        fallback_entry(
            "gemini-1.5-pro",
            "google-vertex",
            Decimal::new(125, 5),
            Decimal::new(500, 5),
        ),
        fallback_entry("nova-pro", "aws-bedrock", Decimal::new(80, 5), Decimal::new(320, 5)),
        fallback_entry("nova-lite", "aws-bedrock", Decimal::new(6, 5), Decimal::new(24, 5)),
        fallback_entry("llama3.1", "ollama", Decimal::ZERO, Decimal::ZERO),
        fallback_entry(
            DEFAULT_PRICING_KEY,
            "unknown",
            Decimal::new(100, 5),
            Decimal::new(300, 5),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_lookup_normalizes() {
        let service = PricingService::fallback_only("us-east-1");
        let pricing = service.get_pricing("us.anthropic.claude-haiku-4-5-v1:0").await;
        assert_eq!(pricing.model_id, "claude-haiku-4-5");
        assert_eq!(pricing.source, PricingSource::Fallback);
    }

    #[tokio::test]
    async fn unknown_model_uses_default_entry() {
        let service = PricingService::fallback_only("us-east-1");
        let pricing = service.get_pricing("totally-new-model").await;
        assert_eq!(pricing.model_id, DEFAULT_PRICING_KEY);
    }

    #[tokio::test]
    async fn cost_total_is_sum_of_parts() {
        let service = PricingService::fallback_only("us-east-1");
        let cost = service.calculate_cost("gpt-4o", 123_456, 7_890, None).await;
        assert_eq!(cost.total_cost, cost.input_cost + cost.output_cost);
        assert!(cost.input_cost.scale() <= 8);
        assert!(cost.total_cost > Decimal::ZERO);
    }

    #[tokio::test]
    async fn cost_rounds_to_eight_decimals() {
        let service = PricingService::fallback_only("us-east-1");
        // 1 token at 0.0025/1k = 0.0000025, within the 8-decimal scale.
        let cost = service.calculate_cost("gpt-4o", 1, 0, None).await;
        assert_eq!(cost.input_cost, Decimal::new(25, 7));
        assert_eq!(cost.output_cost, Decimal::ZERO);
        assert!(cost.input_cost.scale() <= 8);
    }

    #[tokio::test]
    async fn zero_tokens_cost_zero() {
        let service = PricingService::fallback_only("us-east-1");
        let cost = service.calculate_cost("gpt-4o", 0, 0, None).await;
        assert_eq!(cost.total_cost, Decimal::ZERO);
    }

    #[tokio::test]
    async fn refresh_replaces_live_table() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "prices": [{
                    "model_id": "azure/gpt-4o",
                    "input_per_1k": "0.002",
                    "output_per_1k": "0.008",
                    "region": "eastus"
                }]
            })))
            .mount(&server)
            .await;

        let service = PricingService::new(server.uri(), "eastus");
        let count = service.refresh().await.unwrap();
        assert_eq!(count, 1);

        let pricing = service.get_pricing("gpt-4o").await;
        assert_eq!(pricing.source, PricingSource::LiveApi);
        assert_eq!(pricing.input_price_per_1k, Decimal::new(2, 3));
        assert_eq!(pricing.region, "eastus");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_fallback_working() {
        let service = PricingService::new("http://127.0.0.1:1/prices", "us-east-1");
        assert!(service.refresh().await.is_err());
        let pricing = service.get_pricing("gpt-4o-mini").await;
        assert_eq!(pricing.source, PricingSource::Fallback);
    }
}
