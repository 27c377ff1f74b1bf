//! AWS Bedrock adapter (Converse wire shape).
//!
//! Uses the Converse surface with bearer-token API keys, which keeps the
//! whole fleet on one HTTP stack. The model travels in the URL
//! (`/model/{modelId}/converse`), tools in a `toolConfig` with `toolSpec`
//! entries, and the stream speaks `contentBlockStart | contentBlockDelta |
//! contentBlockStop | messageStop` events plus a trailing `metadata` event
//! carrying usage.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;

use relay_types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, MessageContent, ProviderConfig,
    ProviderError, ProviderType, Role, TokenUsage, ToolCall,
};

use crate::common::{classify_http_error, classify_transport_error};
use crate::provider::{CompletionStream, ModelListing, Provider, StreamChunk};
use crate::sse::SseFramer;

pub(crate) mod wire {
    //! Converse wire structs (camelCase on the wire).

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConverseRequest {
        pub messages: Vec<WireMessage>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub system: Vec<SystemBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub inference_config: Option<InferenceConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tool_config: Option<ToolConfig>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SystemBlock {
        pub text: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InferenceConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ToolConfig {
        pub tools: Vec<ToolEntry>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ToolEntry {
        pub tool_spec: ToolSpec,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ToolSpec {
        pub name: String,
        pub description: String,
        pub input_schema: InputSchema,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct InputSchema {
        pub json: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WireMessage {
        pub role: String,
        pub content: Vec<Block>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Block {
        #[serde(rename = "text")]
        Text(String),
        #[serde(rename = "toolUse")]
        ToolUse(ToolUseBlock),
        #[serde(rename = "toolResult")]
        ToolResult(ToolResultBlock),
        #[serde(rename = "image")]
        Image(ImageBlock),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ToolUseBlock {
        pub tool_use_id: String,
        pub name: String,
        pub input: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ToolResultBlock {
        pub tool_use_id: String,
        pub content: Vec<ToolResultContent>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum ToolResultContent {
        #[serde(rename = "text")]
        Text(String),
        #[serde(rename = "json")]
        Json(serde_json::Value),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ImageBlock {
        pub format: String,
        pub source: ImageBlockSource,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ImageBlockSource {
        pub bytes: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConverseResponse {
        pub output: ConverseOutput,
        pub stop_reason: Option<String>,
        pub usage: Usage,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ConverseOutput {
        pub message: WireMessage,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Usage {
        #[serde(default)]
        pub input_tokens: u64,
        #[serde(default)]
        pub output_tokens: u64,
        #[serde(default)]
        pub total_tokens: u64,
    }
}

// ---- Codec ---------------------------------------------------------------

fn media_type_to_format(media_type: &str) -> String {
    media_type.strip_prefix("image/").unwrap_or(media_type).to_string()
}

pub(crate) fn messages_to_wire(
    messages: &[Message],
) -> (Vec<wire::SystemBlock>, Vec<wire::WireMessage>) {
    let mut system = Vec::new();
    let mut wire_messages: Vec<wire::WireMessage> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system.push(wire::SystemBlock { text: message.content.as_text() }),
            Role::User => {
                let content = match &message.content {
                    MessageContent::Text(text) => vec![wire::Block::Text(text.clone())],
                    MessageContent::Parts(parts) => parts
                        .iter()
                        .map(|part| match part {
                            relay_types::ContentPart::Text { text } => {
                                wire::Block::Text(text.clone())
                            }
                            relay_types::ContentPart::Image { source, media_type } => {
                                let bytes = match source {
                                    relay_types::ImageSource::Base64 { data } => data.clone(),
                                    relay_types::ImageSource::Url { url } => url.clone(),
                                };
                                wire::Block::Image(wire::ImageBlock {
                                    format: media_type_to_format(media_type),
                                    source: wire::ImageBlockSource { bytes },
                                })
                            }
                        })
                        .collect(),
                };
                wire_messages.push(wire::WireMessage { role: "user".into(), content });
            }
            Role::Assistant => {
                let mut content = Vec::new();
                let text = message.content.as_text();
                if !text.is_empty() {
                    content.push(wire::Block::Text(text));
                }
                for call in &message.tool_calls {
                    content.push(wire::Block::ToolUse(wire::ToolUseBlock {
                        tool_use_id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    }));
                }
                wire_messages.push(wire::WireMessage { role: "assistant".into(), content });
            }
            Role::Tool => {
                let result = wire::Block::ToolResult(wire::ToolResultBlock {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: vec![wire::ToolResultContent::Text(message.content.as_text())],
                });
                // Converse wants tool results inside a user message; merge
                // consecutive results into one.
                match wire_messages.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last
                                .content
                                .iter()
                                .all(|b| matches!(b, wire::Block::ToolResult(_))) =>
                    {
                        last.content.push(result);
                    }
                    _ => wire_messages.push(wire::WireMessage {
                        role: "user".into(),
                        content: vec![result],
                    }),
                }
            }
        }
    }
    (system, wire_messages)
}

pub(crate) fn request_to_wire(request: &CompletionRequest) -> wire::ConverseRequest {
    let (system, messages) = messages_to_wire(&request.messages);
    let tool_config = if request.tools.is_empty() {
        None
    } else {
        Some(wire::ToolConfig {
            tools: request
                .tools
                .iter()
                .map(|tool| wire::ToolEntry {
                    tool_spec: wire::ToolSpec {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: wire::InputSchema { json: tool.parameters.clone() },
                    },
                })
                .collect(),
        })
    };
    wire::ConverseRequest {
        messages,
        system,
        inference_config: Some(wire::InferenceConfig {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }),
        tool_config,
    }
}

pub(crate) fn stop_reason_from_wire(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some("content_filtered") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn response_from_wire(model: &str, response: wire::ConverseResponse) -> CompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in response.output.message.content {
        match block {
            wire::Block::Text(t) => text.push_str(&t),
            wire::Block::ToolUse(tool_use) => tool_calls.push(ToolCall {
                id: tool_use.tool_use_id,
                name: tool_use.name,
                arguments: tool_use.input,
            }),
            _ => {}
        }
    }
    CompletionResponse {
        id: String::new(),
        model: model.to_string(),
        message: Message {
            role: Role::Assistant,
            content: MessageContent::Text(text),
            tool_calls,
            tool_call_id: None,
        },
        usage: TokenUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.total_tokens,
        },
        finish_reason: stop_reason_from_wire(response.stop_reason.as_deref()),
    }
}

// ---- Adapter -------------------------------------------------------------

/// AWS Bedrock provider over the Converse surface.
pub struct BedrockProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl BedrockProvider {
    /// Build an adapter from a provider config.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    async fn post(
        &self,
        path: String,
        body: &wire::ConverseRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, body));
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsBedrock
    }

    async fn list_models(&self) -> Result<Vec<ModelListing>, ProviderError> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct List {
            model_summaries: Vec<Summary>,
        }
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Summary {
            model_id: String,
            #[serde(default)]
            model_name: Option<String>,
        }
        let response = self
            .client
            .get(format!("{}/foundation-models", self.endpoint))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, body));
        }
        let list: List = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(list
            .model_summaries
            .into_iter()
            .map(|summary| ModelListing {
                name: summary.model_name.unwrap_or_else(|| summary.model_id.clone()),
                id: summary.model_id,
                provider: self.name.clone(),
            })
            .collect())
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_request = request_to_wire(&request);
        let response = self
            .post(format!("/model/{}/converse", request.model), &api_request)
            .await?;
        let parsed: wire::ConverseResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(response_from_wire(&request.model, parsed))
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let api_request = request_to_wire(&request);
        let model = request.model.clone();
        let response = self
            .post(format!("/model/{}/converse-stream", request.model), &api_request)
            .await?;

        let (tx, stream) = CompletionStream::channel();
        tokio::spawn(async move {
            let mut framer = SseFramer::new();
            let mut body = response.bytes_stream();
            // Converse block index -> stream call index.
            let mut tool_blocks: HashMap<u64, usize> = HashMap::new();
            let mut next_call_index = 0usize;
            let mut finish_reason = FinishReason::Stop;
            let mut usage = TokenUsage::default();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for event in framer.push(&chunk) {
                    let Some(kind) = event.event.as_deref() else {
                        continue;
                    };
                    let data: serde_json::Value = match serde_json::from_str(&event.data) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = tx
                                .send(Err(ProviderError::Stream(format!("bad event: {e}"))))
                                .await;
                            return;
                        }
                    };
                    match kind {
                        "contentBlockStart" => {
                            let index = data["contentBlockIndex"].as_u64().unwrap_or(0);
                            if let Some(tool_use) = data["start"].get("toolUse") {
                                let call_index = next_call_index;
                                next_call_index += 1;
                                tool_blocks.insert(index, call_index);
                                let delta = StreamChunk::ToolCallDelta {
                                    index: call_index,
                                    id: tool_use["toolUseId"].as_str().map(str::to_string),
                                    name: tool_use["name"].as_str().map(str::to_string),
                                    arguments_delta: String::new(),
                                };
                                if tx.send(Ok(delta)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        "contentBlockDelta" => {
                            let index = data["contentBlockIndex"].as_u64().unwrap_or(0);
                            if let Some(text) = data["delta"]["text"].as_str() {
                                if !text.is_empty()
                                    && tx
                                        .send(Ok(StreamChunk::TextDelta { text: text.to_string() }))
                                        .await
                                        .is_err()
                                {
                                    return;
                                }
                            } else if let Some(fragment) = data["delta"]["toolUse"]["input"].as_str()
                            {
                                if let Some(call_index) = tool_blocks.get(&index) {
                                    let delta = StreamChunk::ToolCallDelta {
                                        index: *call_index,
                                        id: None,
                                        name: None,
                                        arguments_delta: fragment.to_string(),
                                    };
                                    if tx.send(Ok(delta)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        "messageStop" => {
                            finish_reason =
                                stop_reason_from_wire(data["stopReason"].as_str());
                        }
                        "metadata" => {
                            usage = TokenUsage {
                                prompt_tokens: data["usage"]["inputTokens"].as_u64().unwrap_or(0),
                                completion_tokens: data["usage"]["outputTokens"]
                                    .as_u64()
                                    .unwrap_or(0),
                                total_tokens: data["usage"]["totalTokens"].as_u64().unwrap_or(0),
                            };
                        }
                        // contentBlockStop: nothing to forward.
                        _ => {}
                    }
                }
            }

            if usage.total_tokens == 0 {
                usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
            }
            let _ = tx
                .send(Ok(StreamChunk::Done { finish_reason, usage, model }))
                .await;
        });

        Ok(stream)
    }
}
