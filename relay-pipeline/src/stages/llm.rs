//! Provider dispatch and stream pumping.

use std::sync::Arc;

use async_trait::async_trait;

use relay_providers::{ProviderManager, StreamChunk, parse_tool_arguments};
use relay_types::{
    CompletionRequest, CompletionResponse, FinishReason, GatewayError, Message, MessageContent,
    Role, TokenUsage, ToolCall, TurnEvent,
};

use crate::context::PipelineContext;
use crate::events::EventSink;
use crate::stage::{FailurePolicy, Stage};
use crate::stages::tool_schemas;

/// Runs the completion against the provider fleet and fans the stream out
/// to the turn's event channel.
pub struct LlmStage {
    manager: Arc<ProviderManager>,
}

impl LlmStage {
    /// Build the stage over the provider fleet.
    #[must_use]
    pub fn new(manager: Arc<ProviderManager>) -> Self {
        Self { manager }
    }

    fn build_request(ctx: &PipelineContext, model: String) -> CompletionRequest {
        let mut system = String::new();
        if let Some(augmented) = &ctx.augmented {
            system.push_str(&augmented.system_prompt);
            if !augmented.context_prompt.is_empty() {
                system.push_str("\n\n");
                system.push_str(&augmented.context_prompt);
            }
        }

        let mut messages = Vec::with_capacity(ctx.request.messages.len() + 1);
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.extend(
            ctx.request
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );

        CompletionRequest {
            model,
            messages,
            tools: tool_schemas(ctx),
            tool_choice: None,
            temperature: None,
            max_tokens: None,
            stream: true,
            response_format: None,
            user: Some(ctx.request.user_id.clone()),
        }
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    async fn run(
        &self,
        ctx: &mut PipelineContext,
        events: &EventSink,
    ) -> Result<(), GatewayError> {
        let routing = ctx
            .routing
            .clone()
            .ok_or_else(|| GatewayError::internal("llm stage reached without routing"))?;

        let request = Self::build_request(ctx, routing.model_id.clone());
        let preferred = (!routing.provider.is_empty()).then_some(routing.provider.as_str());

        let outcome = self
            .manager
            .complete_stream(request, preferred)
            .await
            .map_err(GatewayError::from)?;

        // Failed attempts on the way to a working provider surface as
        // warnings, one per failure kind per turn.
        for failure in &outcome.failures {
            let kind = match &failure.error {
                relay_types::ProviderError::Timeout(_) => relay_types::ErrorKind::UpstreamTimeout,
                _ => relay_types::ErrorKind::ProviderUnavailable,
            };
            if ctx.warn_once(kind) {
                events.warn(
                    kind.as_str(),
                    format!("{} failed: {}", failure.provider, failure.error),
                );
            }
        }

        // Pump the stream, forwarding deltas and assembling the response.
        let mut stream = outcome.value;
        let mut text = String::new();
        let mut calls: Vec<(Option<String>, Option<String>, String)> = Vec::new();
        let mut finish_reason = FinishReason::Stop;
        let mut usage = TokenUsage::default();
        let mut model = routing.model_id.clone();

        while let Some(item) = stream.next().await {
            match item.map_err(GatewayError::from)? {
                StreamChunk::TextDelta { text: fragment } => {
                    text.push_str(&fragment);
                    events.emit(TurnEvent::TextDelta { text: fragment });
                }
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
                    events.emit(TurnEvent::ToolCallDelta {
                        id: slot.0.clone().unwrap_or_else(|| format!("call_{index}")),
                        name: slot.1.clone().unwrap_or_default(),
                        arguments_delta,
                    });
                }
                StreamChunk::Done { finish_reason: reason, usage: u, model: m } => {
                    finish_reason = reason;
                    usage = u;
                    model = m;
                }
            }
        }

        let tool_calls: Vec<ToolCall> = calls
            .into_iter()
            .enumerate()
            .map(|(i, (id, name, raw))| ToolCall {
                id: id.unwrap_or_else(|| format!("call_{i}")),
                name: name.unwrap_or_default(),
                arguments: parse_tool_arguments(&raw),
            })
            .collect();

        ctx.response = Some(CompletionResponse {
            id: ctx.turn_id.clone(),
            model: model.clone(),
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(text),
                tool_calls,
                tool_call_id: None,
            },
            usage,
            finish_reason,
        });
        ctx.usage = usage;
        ctx.served_model = Some(model);
        Ok(())
    }
}
