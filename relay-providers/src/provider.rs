//! The unified provider interface.
//!
//! Every backend implements [`Provider`]; callers never see a native wire
//! shape. Construction is initialization: building an adapter from the
//! same [`relay_types::ProviderConfig`] twice yields identical behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use relay_types::{
    CompletionRequest, CompletionResponse, FinishReason, ProviderError, ProviderType, TokenUsage,
};

/// Bounded capacity of a completion stream's channel. Producers block when
/// the consumer falls this far behind (back-pressure).
pub const STREAM_BUFFER: usize = 64;

/// One model as reported by a provider's listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelListing {
    /// Model identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider instance that listed it.
    pub provider: String,
}

/// Health classification of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Serving requests normally.
    Healthy,
    /// Recent failures; still eligible with reduced preference.
    Degraded,
    /// Too many consecutive failures; excluded until re-probed.
    Unhealthy,
}

/// Point-in-time health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Current classification.
    pub status: HealthStatus,
    /// Smoothed average latency, when any calls have completed.
    pub latency_ms: Option<f64>,
    /// When the snapshot was taken.
    pub last_checked: DateTime<Utc>,
}

/// An incremental event from a streaming completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental assistant text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// Incremental tool-call assembly.
    ToolCallDelta {
        /// Position of the call within the response.
        index: usize,
        /// Call id; present from the first fragment of a call.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool name; present from the first fragment of a call.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// JSON fragment of the arguments.
        arguments_delta: String,
    },
    /// Terminal event of the stream.
    Done {
        /// Why generation stopped.
        finish_reason: FinishReason,
        /// Token usage, when the provider reported it.
        usage: TokenUsage,
        /// The model that served the stream.
        model: String,
    },
}

/// Item type of a completion stream.
pub type StreamItem = Result<StreamChunk, ProviderError>;

/// A finite, non-restartable stream of completion events.
///
/// Backed by a bounded channel: the producer task blocks when the consumer
/// falls behind, and dropping the stream closes the channel, which cancels
/// the producer and tears down the underlying HTTP call.
pub struct CompletionStream {
    receiver: mpsc::Receiver<StreamItem>,
}

impl CompletionStream {
    /// Create a bounded channel pair for a producer task.
    #[must_use]
    pub fn channel() -> (mpsc::Sender<StreamItem>, CompletionStream) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (tx, CompletionStream { receiver: rx })
    }

    /// Receive the next event, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<StreamItem> {
        self.receiver.recv().await
    }

    /// Drain the stream into a full [`CompletionResponse`].
    ///
    /// Useful for non-streaming callers sitting on a streaming-only path.
    pub async fn collect(mut self) -> Result<CompletionResponse, ProviderError> {
        use relay_types::{Message, MessageContent, Role, ToolCall};

        let mut text = String::new();
        let mut calls: Vec<(Option<String>, Option<String>, String)> = Vec::new();
        let mut terminal: Option<(FinishReason, TokenUsage, String)> = None;

        while let Some(item) = self.next().await {
            match item? {
                StreamChunk::TextDelta { text: t } => text.push_str(&t),
                StreamChunk::ToolCallDelta { index, id, name, arguments_delta } => {
                    if calls.len() <= index {
                        calls.resize(index + 1, (None, None, String::new()));
                    }
                    let slot = &mut calls[index];
                    if id.is_some() {
                        slot.0 = id;
                    }
                    if name.is_some() {
                        slot.1 = name;
                    }
                    slot.2.push_str(&arguments_delta);
                }
                StreamChunk::Done { finish_reason, usage, model } => {
                    terminal = Some((finish_reason, usage, model));
                }
            }
        }

        let (finish_reason, usage, model) = terminal
            .ok_or_else(|| ProviderError::Stream("stream ended without done event".into()))?;

        let tool_calls: Vec<ToolCall> = calls
            .into_iter()
            .enumerate()
            .map(|(i, (id, name, raw))| ToolCall {
                id: id.unwrap_or_else(|| format!("call_{i}")),
                name: name.unwrap_or_default(),
                arguments: crate::common::parse_tool_arguments(&raw),
            })
            .collect();

        Ok(CompletionResponse {
            id: String::new(),
            model: model.clone(),
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(text),
                tool_calls,
                tool_call_id: None,
            },
            usage,
            finish_reason,
        })
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream").finish_non_exhaustive()
    }
}

/// Unified capability set every backend implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Instance name (unique across the fleet).
    fn name(&self) -> &str;

    /// Which backend this adapter fronts.
    fn provider_type(&self) -> ProviderType;

    /// List available models.
    async fn list_models(&self) -> Result<Vec<ModelListing>, ProviderError>;

    /// Run a completion to the end and return the full response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Run a completion as a stream of events.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;

    /// Embed texts into fixed-dimension vectors.
    ///
    /// Providers without an embedding surface return
    /// [`ProviderError::Unsupported`].
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{} does not serve embeddings",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_assembles_text_and_calls() {
        let (tx, stream) = CompletionStream::channel();
        tokio::spawn(async move {
            let _ = tx.send(Ok(StreamChunk::TextDelta { text: "Hel".into() })).await;
            let _ = tx.send(Ok(StreamChunk::TextDelta { text: "lo".into() })).await;
            let _ = tx
                .send(Ok(StreamChunk::ToolCallDelta {
                    index: 0,
                    id: Some("call_a".into()),
                    name: Some("azure.subscription_list".into()),
                    arguments_delta: "{\"scope\":".into(),
                }))
                .await;
            let _ = tx
                .send(Ok(StreamChunk::ToolCallDelta {
                    index: 0,
                    id: None,
                    name: None,
                    arguments_delta: "\"all\"}".into(),
                }))
                .await;
            let _ = tx
                .send(Ok(StreamChunk::Done {
                    finish_reason: FinishReason::ToolCalls,
                    usage: TokenUsage::new(10, 4),
                    model: "gpt-4o".into(),
                }))
                .await;
        });

        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content.as_text(), "Hello");
        assert_eq!(response.message.tool_calls.len(), 1);
        assert_eq!(response.message.tool_calls[0].id, "call_a");
        assert_eq!(
            response.message.tool_calls[0].arguments,
            serde_json::json!({"scope": "all"})
        );
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn collect_without_done_is_a_stream_error() {
        let (tx, stream) = CompletionStream::channel();
        drop(tx);
        let err = stream.collect().await.unwrap_err();
        assert!(matches!(err, ProviderError::Stream(_)));
    }

    #[tokio::test]
    async fn malformed_arguments_become_empty_object() {
        let (tx, stream) = CompletionStream::channel();
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(StreamChunk::ToolCallDelta {
                    index: 0,
                    id: Some("call_a".into()),
                    name: Some("t".into()),
                    arguments_delta: "{not json".into(),
                }))
                .await;
            let _ = tx
                .send(Ok(StreamChunk::Done {
                    finish_reason: FinishReason::ToolCalls,
                    usage: TokenUsage::default(),
                    model: "m".into(),
                }))
                .await;
        });
        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.tool_calls[0].arguments, serde_json::json!({}));
    }
}
