//! The model capability catalog.
//!
//! Discovery lists models from every enabled provider and infers a
//! capability profile from naming patterns, conservatively: a model the
//! rules don't recognize gets function-calling accuracy 0.70 and modest
//! defaults. One provider's discovery failure never blocks the others.
//! The catalog is process-wide, read-mostly, and refreshed on an interval
//! or by explicit request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use relay_providers::{ModelListing, ProviderManager};
use relay_types::{
    ModelCapabilities, ModelCost, ModelMetadata, ModelPerformance, ModelProfile, ProviderType,
};

/// Per-family inference rules: `(marker, accuracy, context, latency_ms,
/// input $/1k, output $/1k)`. First marker match wins.
const FAMILY_RULES: &[(&str, f64, u64, f64, &str, &str)] = &[
    ("gpt-4.1", 0.95, 1_000_000, 600.0, "0.002", "0.008"),
    ("gpt-4o", 0.95, 128_000, 500.0, "0.0025", "0.01"),
    ("o3", 0.93, 200_000, 1_500.0, "0.002", "0.008"),
    ("claude", 0.95, 200_000, 700.0, "0.003", "0.015"),
    ("gemini", 0.92, 1_000_000, 400.0, "0.000125", "0.0005"),
    ("nova", 0.85, 300_000, 400.0, "0.0008", "0.0032"),
    ("mistral", 0.85, 128_000, 450.0, "0.0004", "0.002"),
    ("llama", 0.80, 128_000, 350.0, "0", "0"),
    ("phi", 0.75, 128_000, 300.0, "0", "0"),
];

/// Markers that mark a model as a small/fast variant.
const SMALL_MARKERS: &[&str] = &["mini", "nano", "lite", "flash", "haiku", "8b", "7b"];

/// Infer a capability profile from a listing.
#[must_use]
pub fn infer_profile(listing: &ModelListing, provider_type: ProviderType) -> ModelProfile {
    let id = listing.id.to_lowercase();

    let mut capabilities = ModelCapabilities::default();
    let mut performance = ModelPerformance::default();
    let mut cost = ModelCost::default();
    let mut family = String::new();

    if id.contains("embed") {
        capabilities.chat = false;
        capabilities.embeddings = true;
        capabilities.streaming = false;
        family = "embedding".into();
    } else {
        for (marker, accuracy, context, latency, input, output) in FAMILY_RULES {
            if id.contains(marker) {
                family = (*marker).to_string();
                capabilities.function_calling = true;
                capabilities.function_calling_accuracy = *accuracy;
                capabilities.json_mode = true;
                capabilities.structured_output = *accuracy >= 0.9;
                performance.max_context_tokens = *context;
                performance.avg_latency_ms = *latency;
                cost.input_per_1k_tokens = input.parse().unwrap_or(Decimal::ZERO);
                cost.output_per_1k_tokens = output.parse().unwrap_or(Decimal::ZERO);
                break;
            }
        }
        if family.is_empty() && (id.contains("instruct") || id.contains("chat")) {
            capabilities.function_calling = true;
        }

        capabilities.vision = id.contains("vision")
            || family == "gpt-4o"
            || family == "claude"
            || family == "gemini";
        capabilities.image_generation = id.contains("dall-e") || id.contains("image");

        if SMALL_MARKERS.iter().any(|m| id.contains(m)) {
            performance.avg_latency_ms *= 0.6;
            performance.tokens_per_second = 90.0;
            cost.input_per_1k_tokens /= Decimal::from(4u32);
            cost.output_per_1k_tokens /= Decimal::from(4u32);
        }
    }

    let version = id
        .rsplit('-')
        .next()
        .filter(|tail| tail.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .map(str::to_string);

    ModelProfile {
        model_id: listing.id.clone(),
        provider: listing.provider.clone(),
        provider_type,
        capabilities,
        performance,
        cost,
        metadata: ModelMetadata {
            family,
            version,
            specializations: Vec::new(),
            last_tested: Some(Utc::now()),
            is_available: true,
        },
        embedding: None,
    }
}

/// One sentence describing what a model can do, used for embedding-based
/// catalog search.
#[must_use]
pub fn capability_description(profile: &ModelProfile) -> String {
    let caps = &profile.capabilities;
    let mut abilities = Vec::new();
    if caps.chat {
        abilities.push("chat".to_string());
    }
    if caps.function_calling {
        abilities.push(format!(
            "function calling at {:.2} accuracy",
            caps.function_calling_accuracy
        ));
    }
    if caps.vision {
        abilities.push("vision".into());
    }
    if caps.embeddings {
        abilities.push("embeddings".into());
    }
    if caps.json_mode {
        abilities.push("json output".into());
    }
    format!(
        "{} ({} family) on {}: {} with a {} token window",
        profile.model_id,
        profile.metadata.family,
        profile.provider,
        abilities.join(", "),
        profile.performance.max_context_tokens
    )
}

/// The process-wide catalog.
pub struct ModelCatalog {
    manager: Arc<ProviderManager>,
    profiles: RwLock<HashMap<String, ModelProfile>>,
}

impl ModelCatalog {
    /// Build an empty catalog over the provider fleet.
    #[must_use]
    pub fn new(manager: Arc<ProviderManager>) -> Self {
        Self { manager, profiles: RwLock::new(HashMap::new()) }
    }

    /// Discover models from every provider and rebuild the catalog.
    /// Returns the number of profiles now held.
    pub async fn refresh(&self) -> usize {
        let mut profiles = HashMap::new();
        for (provider_type, _name, models) in self.manager.list_all_models().await {
            for listing in models {
                let profile = infer_profile(&listing, provider_type);
                profiles.insert(profile.model_id.clone(), profile);
            }
        }
        let count = profiles.len();
        *self.profiles.write().await = profiles;
        tracing::info!(models = count, "relay.router.catalog_refreshed");
        count
    }

    /// Spawn the interval refresh loop. Abort the handle at shutdown.
    pub fn start_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                catalog.refresh().await;
            }
        })
    }

    /// Insert or replace one profile (tests, manual overrides).
    pub async fn upsert(&self, profile: ModelProfile) {
        self.profiles.write().await.insert(profile.model_id.clone(), profile);
    }

    /// Snapshot of every available profile.
    pub async fn available(&self) -> Vec<ModelProfile> {
        self.profiles
            .read()
            .await
            .values()
            .filter(|p| p.metadata.is_available)
            .cloned()
            .collect()
    }

    /// Look up one profile.
    pub async fn get(&self, model_id: &str) -> Option<ModelProfile> {
        self.profiles.read().await.get(model_id).cloned()
    }

    /// Flip a model's availability.
    pub async fn set_available(&self, model_id: &str, available: bool) {
        if let Some(profile) = self.profiles.write().await.get_mut(model_id) {
            profile.metadata.is_available = available;
        }
    }

    /// Attach capability-description embeddings via `embed`.
    pub async fn index_embeddings<F>(&self, embed: F)
    where
        F: AsyncFn(&str) -> Option<Vec<f32>>,
    {
        let descriptions: Vec<(String, String)> = {
            let profiles = self.profiles.read().await;
            profiles
                .values()
                .map(|p| (p.model_id.clone(), capability_description(p)))
                .collect()
        };
        for (model_id, description) in descriptions {
            if let Some(vector) = embed(&description).await {
                if let Some(profile) = self.profiles.write().await.get_mut(&model_id) {
                    profile.embedding = Some(vector);
                }
            }
        }
    }

    /// Find the profile whose capability embedding is closest to `query`.
    pub async fn search_by_embedding(&self, query: &[f32]) -> Option<ModelProfile> {
        let profiles = self.profiles.read().await;
        profiles
            .values()
            .filter_map(|p| {
                p.embedding
                    .as_ref()
                    .map(|e| (relay_store_cosine(e, query), p))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0).then(b.1.model_id.cmp(&a.1.model_id)))
            .map(|(_, p)| p.clone())
    }
}

// Cosine here mirrors the vector substrate's definition; the catalog holds
// plain vectors and does not need a collection.
fn relay_store_cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}
