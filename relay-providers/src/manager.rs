//! Provider selection, failover, and fleet health.
//!
//! The manager owns one adapter per configured provider plus its health
//! tracker. Selection follows the configured load-balancing strategy over
//! healthy providers; unhealthy ones drop to the back of the order as a
//! last resort. Failover advances only on retryable errors and stops when
//! the per-request failover budget runs out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use relay_types::{
    CompletionRequest, CompletionResponse, GatewayConfig, LoadBalancingStrategy, ProviderConfig,
    ProviderError, ProviderType,
};

use crate::azure_openai::AzureOpenAiProvider;
use crate::bedrock::BedrockProvider;
use crate::foundry::FoundryProvider;
use crate::health::HealthTracker;
use crate::ollama::OllamaProvider;
use crate::provider::{CompletionStream, ModelListing, Provider, ProviderHealth};
use crate::vertex::VertexProvider;

/// Build the adapter for a provider config.
#[must_use]
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn Provider> {
    match config.provider_type {
        ProviderType::AzureOpenai => Arc::new(AzureOpenAiProvider::new(config)),
        ProviderType::AzureAiFoundry => Arc::new(FoundryProvider::new(config)),
        ProviderType::AwsBedrock => Arc::new(BedrockProvider::new(config)),
        ProviderType::GoogleVertex => Arc::new(VertexProvider::new(config)),
        ProviderType::Ollama => Arc::new(OllamaProvider::new(config)),
    }
}

/// One provider with its config and health state.
pub struct ManagedProvider {
    /// The configuration this adapter was built from.
    pub config: ProviderConfig,
    provider: Arc<dyn Provider>,
    health: HealthTracker,
}

/// A failed attempt during failover, reported for observability.
#[derive(Debug)]
pub struct FailedAttempt {
    /// Provider that failed.
    pub provider: String,
    /// What went wrong.
    pub error: ProviderError,
}

/// A successful call plus the failover trail that led to it.
#[derive(Debug)]
pub struct CompletionOutcome<T> {
    /// The result value.
    pub value: T,
    /// Provider that served it.
    pub provider: String,
    /// Providers tried and failed before this one.
    pub failures: Vec<FailedAttempt>,
}

/// The provider fleet.
pub struct ProviderManager {
    providers: Vec<ManagedProvider>,
    strategy: LoadBalancingStrategy,
    enable_failover: bool,
    failover_timeout: Duration,
    rr_cursor: AtomicUsize,
}

impl ProviderManager {
    /// Build the fleet from gateway configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.clone(), build_provider(p)))
            .collect();
        Self::with_providers(providers, config)
    }

    /// Build the fleet from pre-constructed adapters (used by tests).
    #[must_use]
    pub fn with_providers(
        providers: Vec<(ProviderConfig, Arc<dyn Provider>)>,
        config: &GatewayConfig,
    ) -> Self {
        let strategy = if config.enable_load_balancing {
            config.load_balancing_strategy
        } else {
            LoadBalancingStrategy::Priority
        };
        Self {
            providers: providers
                .into_iter()
                .filter(|(c, _)| c.enabled)
                .map(|(config, provider)| ManagedProvider {
                    config,
                    provider,
                    health: HealthTracker::default(),
                })
                .collect(),
            strategy,
            enable_failover: config.enable_failover,
            failover_timeout: Duration::from_millis(config.failover_timeout_ms),
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Number of enabled providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the fleet is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Selection order for one request: the preferred provider first (when
    /// named), then healthy providers per strategy, then unhealthy ones.
    fn ordered_candidates(&self, preferred: Option<&str>) -> Vec<&ManagedProvider> {
        let mut healthy: Vec<&ManagedProvider> = Vec::new();
        let mut unhealthy: Vec<&ManagedProvider> = Vec::new();
        for managed in &self.providers {
            if managed.health.is_healthy() {
                healthy.push(managed);
            } else {
                unhealthy.push(managed);
            }
        }

        match self.strategy {
            LoadBalancingStrategy::Priority => {
                healthy.sort_by_key(|m| m.config.priority);
            }
            LoadBalancingStrategy::RoundRobin => {
                healthy.sort_by_key(|m| m.config.priority);
                if !healthy.is_empty() {
                    let start = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
                    healthy.rotate_left(start);
                }
            }
            LoadBalancingStrategy::LeastLatency => {
                healthy.sort_by(|a, b| {
                    let la = a.health.latency_ms().unwrap_or(f64::MAX);
                    let lb = b.health.latency_ms().unwrap_or(f64::MAX);
                    la.total_cmp(&lb).then(a.config.priority.cmp(&b.config.priority))
                });
            }
        }

        unhealthy.sort_by_key(|m| m.config.priority);
        let mut ordered = healthy;
        ordered.extend(unhealthy);

        if let Some(name) = preferred {
            if let Some(pos) = ordered.iter().position(|m| m.config.name == name) {
                let preferred = ordered.remove(pos);
                ordered.insert(0, preferred);
            }
        }
        ordered
    }

    async fn run_with_failover<T, F>(
        &self,
        preferred: Option<&str>,
        call: F,
    ) -> Result<CompletionOutcome<T>, ProviderError>
    where
        F: Fn(Arc<dyn Provider>) -> futures::future::BoxFuture<'static, Result<T, ProviderError>>,
    {
        let candidates = self.ordered_candidates(preferred);
        if candidates.is_empty() {
            return Err(ProviderError::ServiceUnavailable(
                "no enabled providers".into(),
            ));
        }

        let deadline = Instant::now() + self.failover_timeout;
        let mut failures = Vec::new();

        for (attempt, managed) in candidates.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if attempt > 0 && remaining.is_zero() {
                break;
            }

            let started = Instant::now();
            let provider = Arc::clone(&managed.provider);
            let result = tokio::time::timeout(remaining, call(provider))
                .await
                .unwrap_or(Err(ProviderError::Timeout(remaining)));

            match result {
                Ok(value) => {
                    managed
                        .health
                        .record_success(started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(CompletionOutcome {
                        value,
                        provider: managed.config.name.clone(),
                        failures,
                    });
                }
                Err(error) => {
                    managed.health.record_failure();
                    tracing::warn!(
                        provider = %managed.config.name,
                        error = %error,
                        "relay.provider.attempt_failed"
                    );
                    let retryable = error.is_retryable();
                    failures.push(FailedAttempt {
                        provider: managed.config.name.clone(),
                        error,
                    });
                    if !retryable || !self.enable_failover {
                        break;
                    }
                }
            }
        }

        // All candidates exhausted; hand back the last failure.
        let last = failures.pop().map(|f| f.error).unwrap_or_else(|| {
            ProviderError::ServiceUnavailable("no providers attempted".into())
        });
        Err(last)
    }

    /// Run a non-streaming completion with failover.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        preferred: Option<&str>,
    ) -> Result<CompletionOutcome<CompletionResponse>, ProviderError> {
        self.run_with_failover(preferred, move |provider: Arc<dyn Provider>| {
            let request = request.clone();
            Box::pin(async move { provider.complete(request).await })
        })
        .await
    }

    /// Establish a streaming completion with failover.
    ///
    /// Failover covers stream establishment; once the first event flows, the
    /// stream belongs to the chosen provider.
    pub async fn complete_stream(
        &self,
        request: CompletionRequest,
        preferred: Option<&str>,
    ) -> Result<CompletionOutcome<CompletionStream>, ProviderError> {
        self.run_with_failover(preferred, move |provider: Arc<dyn Provider>| {
            let request = request.clone();
            Box::pin(async move { provider.complete_stream(request).await })
        })
        .await
    }

    /// Embed texts with the first provider that supports embeddings.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut last = ProviderError::Unsupported("no provider serves embeddings".into());
        for managed in self.ordered_candidates(None) {
            match managed.provider.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(ProviderError::Unsupported(_)) => continue,
                Err(error) => last = error,
            }
        }
        Err(last)
    }

    /// List models from every provider. One provider's failure is logged
    /// and skipped, never fatal.
    pub async fn list_all_models(&self) -> Vec<(ProviderType, String, Vec<ModelListing>)> {
        let mut all = Vec::new();
        for managed in &self.providers {
            match managed.provider.list_models().await {
                Ok(models) => {
                    all.push((
                        managed.config.provider_type,
                        managed.config.name.clone(),
                        models,
                    ));
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %managed.config.name,
                        error = %error,
                        "relay.provider.discovery_failed"
                    );
                }
            }
        }
        all
    }

    /// Health snapshot per provider.
    #[must_use]
    pub fn health_report(&self) -> Vec<(String, ProviderHealth)> {
        self.providers
            .iter()
            .map(|m| (m.config.name.clone(), m.health.snapshot()))
            .collect()
    }

    /// Spawn the re-probe loop: unhealthy providers get a `list_models`
    /// probe every `every`; success folds them back into rotation. Abort
    /// the handle at shutdown.
    pub fn start_health_probes(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                for managed in &manager.providers {
                    if managed.health.is_healthy() {
                        continue;
                    }
                    let started = Instant::now();
                    match managed.provider.list_models().await {
                        Ok(_) => {
                            managed
                                .health
                                .record_success(started.elapsed().as_secs_f64() * 1000.0);
                            tracing::info!(
                                provider = %managed.config.name,
                                "relay.provider.recovered"
                            );
                        }
                        Err(_) => managed.health.record_failure(),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_types::{FinishReason, Message, MessageContent, Role, TokenUsage};
    use std::sync::atomic::AtomicU32;

    /// Scripted provider: fails the first `fail_first` calls, then succeeds.
    struct FakeProvider {
        name: String,
        fail_first: u32,
        calls: AtomicU32,
        retryable: bool,
    }

    impl FakeProvider {
        fn new(name: &str, fail_first: u32) -> Self {
            Self {
                name: name.into(),
                fail_first,
                calls: AtomicU32::new(0),
                retryable: true,
            }
        }

        fn terminal(name: &str) -> Self {
            Self {
                name: name.into(),
                fail_first: u32::MAX,
                calls: AtomicU32::new(0),
                retryable: false,
            }
        }

        fn response(&self) -> CompletionResponse {
            CompletionResponse {
                id: "r-1".into(),
                model: format!("{}-model", self.name),
                message: Message {
                    role: Role::Assistant,
                    content: MessageContent::Text("ok".into()),
                    tool_calls: vec![],
                    tool_call_id: None,
                },
                usage: TokenUsage::new(1, 1),
                finish_reason: FinishReason::Stop,
            }
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn provider_type(&self) -> ProviderType {
            ProviderType::AzureOpenai
        }

        async fn list_models(&self) -> Result<Vec<ModelListing>, ProviderError> {
            Ok(vec![])
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                if self.retryable {
                    Err(ProviderError::ServiceUnavailable("scripted 503".into()))
                } else {
                    Err(ProviderError::InvalidRequest("scripted 400".into()))
                }
            } else {
                Ok(self.response())
            }
        }

        async fn complete_stream(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionStream, ProviderError> {
            let response = self.complete(request).await?;
            let (tx, stream) = CompletionStream::channel();
            tokio::spawn(async move {
                let _ = tx
                    .send(Ok(crate::provider::StreamChunk::TextDelta { text: "ok".into() }))
                    .await;
                let _ = tx
                    .send(Ok(crate::provider::StreamChunk::Done {
                        finish_reason: FinishReason::Stop,
                        usage: response.usage,
                        model: response.model,
                    }))
                    .await;
            });
            Ok(stream)
        }
    }

    fn provider_config(name: &str, priority: i32) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            provider_type: ProviderType::AzureOpenai,
            enabled: true,
            priority,
            endpoint: "http://localhost".into(),
            api_key: String::new(),
            region: None,
        }
    }

    fn manager_with(
        providers: Vec<(ProviderConfig, Arc<dyn Provider>)>,
    ) -> ProviderManager {
        ProviderManager::with_providers(providers, &GatewayConfig::default())
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failover_advances_to_secondary() {
        let manager = manager_with(vec![
            (provider_config("primary", 0), Arc::new(FakeProvider::new("primary", 10))),
            (provider_config("secondary", 1), Arc::new(FakeProvider::new("secondary", 0))),
        ]);

        let outcome = manager.complete(request(), None).await.unwrap();
        assert_eq!(outcome.provider, "secondary");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].provider, "primary");
    }

    #[tokio::test]
    async fn terminal_errors_do_not_fail_over() {
        let manager = manager_with(vec![
            (provider_config("primary", 0), Arc::new(FakeProvider::terminal("primary"))),
            (provider_config("secondary", 1), Arc::new(FakeProvider::new("secondary", 0))),
        ]);

        let err = manager.complete(request(), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn empty_fleet_is_unavailable() {
        let manager = manager_with(vec![]);
        let err = manager.complete(request(), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn preferred_provider_goes_first() {
        let manager = manager_with(vec![
            (provider_config("a", 0), Arc::new(FakeProvider::new("a", 0))),
            (provider_config("b", 1), Arc::new(FakeProvider::new("b", 0))),
        ]);

        let outcome = manager.complete(request(), Some("b")).await.unwrap();
        assert_eq!(outcome.provider, "b");
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn exhausted_candidates_surface_last_error() {
        let manager = manager_with(vec![
            (provider_config("a", 0), Arc::new(FakeProvider::new("a", 10))),
            (provider_config("b", 1), Arc::new(FakeProvider::new("b", 10))),
        ]);

        let err = manager.complete(request(), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn repeated_failures_mark_unhealthy() {
        let failing: Arc<dyn Provider> = Arc::new(FakeProvider::new("a", 10));
        let manager = manager_with(vec![(provider_config("a", 0), failing)]);

        for _ in 0..3 {
            let _ = manager.complete(request(), None).await;
        }
        let report = manager.health_report();
        assert_eq!(report[0].1.status, crate::provider::HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn stream_failover_returns_secondary_stream() {
        let manager = manager_with(vec![
            (provider_config("primary", 0), Arc::new(FakeProvider::new("primary", 10))),
            (provider_config("secondary", 1), Arc::new(FakeProvider::new("secondary", 0))),
        ]);

        let outcome = manager.complete_stream(request(), None).await.unwrap();
        assert_eq!(outcome.provider, "secondary");
        let response = outcome.value.collect().await.unwrap();
        assert_eq!(response.model, "secondary-model");
    }

    #[tokio::test]
    async fn round_robin_rotates_across_healthy() {
        let mut config = GatewayConfig {
            enable_load_balancing: true,
            load_balancing_strategy: LoadBalancingStrategy::RoundRobin,
            ..Default::default()
        };
        config.failover_timeout_ms = 1000;
        let manager = ProviderManager::with_providers(
            vec![
                (provider_config("a", 0), Arc::new(FakeProvider::new("a", 0))),
                (provider_config("b", 1), Arc::new(FakeProvider::new("b", 0))),
            ],
            &config,
        );

        let first = manager.complete(request(), None).await.unwrap().provider;
        let second = manager.complete(request(), None).await.unwrap().provider;
        assert_ne!(first, second);
    }
}
