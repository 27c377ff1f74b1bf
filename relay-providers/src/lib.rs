#![deny(missing_docs)]
//! Provider abstraction layer.
//!
//! One [`Provider`] trait fronts five backends; each adapter owns a wire
//! codec that rewrites the gateway's canonical chat-completions shape into
//! the provider-native form and reverses it on the way back, bijectively
//! for the subset the gateway uses:
//!
//! - [`AzureOpenAiProvider`] — chat-completions (the canonical shape).
//! - [`FoundryProvider`] — Claude-style messages API.
//! - [`BedrockProvider`] — Converse.
//! - [`VertexProvider`] — Gemini.
//! - [`OllamaProvider`] — native `/api/chat`.
//!
//! Streaming responses flow through bounded channels ([`CompletionStream`]);
//! the [`ProviderManager`] layers failover, load balancing, and health
//! tracking on top.

pub mod azure_openai;
pub mod bedrock;
pub mod common;
pub mod foundry;
pub mod health;
pub mod manager;
pub mod ollama;
pub mod provider;
pub mod sse;
pub mod vertex;

pub use azure_openai::AzureOpenAiProvider;
pub use bedrock::BedrockProvider;
pub use common::parse_tool_arguments;
pub use foundry::FoundryProvider;
pub use health::HealthTracker;
pub use manager::{
    CompletionOutcome, FailedAttempt, ManagedProvider, ProviderManager, build_provider,
};
pub use ollama::OllamaProvider;
pub use provider::{
    CompletionStream, HealthStatus, ModelListing, Provider, ProviderHealth, StreamChunk,
    StreamItem,
};
pub use sse::{SseEvent, SseFramer};
pub use vertex::VertexProvider;
