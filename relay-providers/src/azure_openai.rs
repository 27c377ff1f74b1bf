//! Azure OpenAI adapter (chat-completions wire shape).
//!
//! Talks to the v1-style unified endpoint (`{endpoint}/chat/completions`)
//! with the model in the body and `api-key` auth. Since the gateway's
//! canonical form *is* the chat-completions shape, the codec here is close
//! to the identity, which also makes it the reference for the mapping the
//! other adapters must reverse correctly.

use async_trait::async_trait;
use futures::StreamExt;

use relay_types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, MessageContent, ProviderConfig,
    ProviderError, ProviderType, TokenUsage, ToolCall,
};

use crate::common::{classify_http_error, classify_transport_error, parse_tool_arguments};
use crate::provider::{CompletionStream, ModelListing, Provider, StreamChunk};
use crate::sse::SseFramer;

pub(crate) mod wire {
    //! Chat-completions wire structs.

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatRequest {
        pub model: String,
        pub messages: Vec<ChatMessage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tools: Option<Vec<ChatTool>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tool_choice: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_tokens: Option<u32>,
        #[serde(default)]
        pub stream: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub stream_options: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub response_format: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub user: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub content: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tool_calls: Option<Vec<ChatToolCall>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub tool_call_id: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatToolCall {
        pub id: String,
        #[serde(rename = "type")]
        pub kind: String,
        pub function: ChatFunctionCall,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatFunctionCall {
        pub name: String,
        pub arguments: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatTool {
        #[serde(rename = "type")]
        pub kind: String,
        pub function: ChatFunctionDef,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatFunctionDef {
        pub name: String,
        pub description: String,
        pub parameters: serde_json::Value,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChatResponse {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub model: String,
        pub choices: Vec<ChatChoice>,
        #[serde(default)]
        pub usage: Option<ChatUsage>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChatChoice {
        pub message: ChatMessage,
        #[serde(default)]
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChatUsage {
        pub prompt_tokens: u64,
        pub completion_tokens: u64,
        pub total_tokens: u64,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChatChunk {
        #[serde(default)]
        pub model: Option<String>,
        #[serde(default)]
        pub choices: Vec<ChunkChoice>,
        #[serde(default)]
        pub usage: Option<ChatUsage>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChunkChoice {
        #[serde(default)]
        pub delta: ChunkDelta,
        #[serde(default)]
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    pub struct ChunkDelta {
        #[serde(default)]
        pub content: Option<String>,
        #[serde(default)]
        pub tool_calls: Option<Vec<ChunkToolCall>>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChunkToolCall {
        pub index: usize,
        #[serde(default)]
        pub id: Option<String>,
        #[serde(default)]
        pub function: Option<ChunkFunction>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChunkFunction {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub arguments: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ModelList {
        pub data: Vec<ModelEntry>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ModelEntry {
        pub id: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct EmbeddingList {
        pub data: Vec<EmbeddingEntry>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct EmbeddingEntry {
        pub embedding: Vec<f32>,
    }
}

// ---- Codec ---------------------------------------------------------------

pub(crate) fn role_to_wire(role: relay_types::Role) -> &'static str {
    match role {
        relay_types::Role::System => "system",
        relay_types::Role::User => "user",
        relay_types::Role::Assistant => "assistant",
        relay_types::Role::Tool => "tool",
    }
}

fn role_from_wire(role: &str) -> relay_types::Role {
    match role {
        "system" => relay_types::Role::System,
        "assistant" => relay_types::Role::Assistant,
        "tool" => relay_types::Role::Tool,
        _ => relay_types::Role::User,
    }
}

fn content_to_wire(content: &MessageContent) -> serde_json::Value {
    match content {
        MessageContent::Text(text) => serde_json::Value::String(text.clone()),
        MessageContent::Parts(parts) => serde_json::Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    relay_types::ContentPart::Text { text } => {
                        serde_json::json!({"type": "text", "text": text})
                    }
                    relay_types::ContentPart::Image { source, media_type } => {
                        let url = match source {
                            relay_types::ImageSource::Url { url } => url.clone(),
                            relay_types::ImageSource::Base64 { data } => {
                                format!("data:{media_type};base64,{data}")
                            }
                        };
                        serde_json::json!({"type": "image_url", "image_url": {"url": url}})
                    }
                })
                .collect(),
        ),
    }
}

fn content_from_wire(content: Option<serde_json::Value>) -> MessageContent {
    match content {
        Some(serde_json::Value::String(text)) => MessageContent::Text(text),
        Some(serde_json::Value::Array(items)) => MessageContent::Parts(
            items
                .into_iter()
                .filter_map(|item| {
                    let kind = item.get("type")?.as_str()?.to_string();
                    match kind.as_str() {
                        "text" => Some(relay_types::ContentPart::Text {
                            text: item.get("text")?.as_str()?.to_string(),
                        }),
                        "image_url" => {
                            let url = item.get("image_url")?.get("url")?.as_str()?.to_string();
                            Some(parse_image_url(&url))
                        }
                        _ => None,
                    }
                })
                .collect(),
        ),
        _ => MessageContent::Text(String::new()),
    }
}

fn parse_image_url(url: &str) -> relay_types::ContentPart {
    // data:<media_type>;base64,<data> round-trips back to the base64 form.
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return relay_types::ContentPart::Image {
                source: relay_types::ImageSource::Base64 { data: data.to_string() },
                media_type: media_type.to_string(),
            };
        }
    }
    relay_types::ContentPart::Image {
        source: relay_types::ImageSource::Url { url: url.to_string() },
        media_type: String::new(),
    }
}

pub(crate) fn message_to_wire(message: &Message) -> wire::ChatMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| wire::ChatToolCall {
                    id: call.id.clone(),
                    kind: "function".into(),
                    function: wire::ChatFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
        )
    };
    wire::ChatMessage {
        role: role_to_wire(message.role).to_string(),
        content: Some(content_to_wire(&message.content)),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

pub(crate) fn message_from_wire(message: wire::ChatMessage) -> Message {
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: parse_tool_arguments(&call.function.arguments),
        })
        .collect();
    Message {
        role: role_from_wire(&message.role),
        content: content_from_wire(message.content),
        tool_calls,
        tool_call_id: message.tool_call_id,
    }
}

pub(crate) fn request_to_wire(request: &CompletionRequest) -> wire::ChatRequest {
    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|tool| wire::ChatTool {
                    kind: "function".into(),
                    function: wire::ChatFunctionDef {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    };
    let tool_choice = request.tool_choice.as_ref().map(|choice| match choice {
        relay_types::ToolChoice::Auto => serde_json::json!("auto"),
        relay_types::ToolChoice::None => serde_json::json!("none"),
        relay_types::ToolChoice::Required => serde_json::json!("required"),
        relay_types::ToolChoice::Function { name } => {
            serde_json::json!({"type": "function", "function": {"name": name}})
        }
    });
    let response_format = request.response_format.as_ref().map(|format| match format {
        relay_types::ResponseFormat::Text => serde_json::json!({"type": "text"}),
        relay_types::ResponseFormat::JsonObject => serde_json::json!({"type": "json_object"}),
    });
    wire::ChatRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(message_to_wire).collect(),
        tools,
        tool_choice,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream: request.stream,
        stream_options: request
            .stream
            .then(|| serde_json::json!({"include_usage": true})),
        response_format,
        user: request.user.clone(),
    }
}

pub(crate) fn finish_reason_from_wire(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn usage_from_wire(usage: Option<wire::ChatUsage>) -> TokenUsage {
    usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default()
}

fn response_from_wire(response: wire::ChatResponse) -> Result<CompletionResponse, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("response had no choices".into()))?;
    Ok(CompletionResponse {
        id: response.id,
        model: response.model,
        message: message_from_wire(choice.message),
        usage: usage_from_wire(response.usage),
        finish_reason: finish_reason_from_wire(choice.finish_reason.as_deref()),
    })
}

// ---- Adapter -------------------------------------------------------------

/// Azure OpenAI provider.
pub struct AzureOpenAiProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    embedding_model: Option<String>,
}

impl AzureOpenAiProvider {
    /// Build an adapter from a provider config.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedding_model: None,
        }
    }

    /// Set the deployment used for [`Provider::embed`].
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(self.url(path))
            .header("api-key", &self.api_key)
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
impl Provider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureOpenai
    }

    async fn list_models(&self) -> Result<Vec<ModelListing>, ProviderError> {
        let response = self
            .client
            .get(self.url("/models"))
            .header("api-key", &self.api_key)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, body));
        }
        let list: wire::ModelList = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .map(|entry| ModelListing {
                name: entry.id.clone(),
                id: entry.id,
                provider: self.name.clone(),
            })
            .collect())
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut api_request = request_to_wire(&request);
        api_request.stream = false;
        api_request.stream_options = None;
        let response = self.post_json("/chat/completions", &api_request).await?;
        let parsed: wire::ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        response_from_wire(parsed)
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let mut api_request = request_to_wire(&request);
        api_request.stream = true;
        api_request.stream_options = Some(serde_json::json!({"include_usage": true}));
        let model = request.model.clone();
        let response = self.post_json("/chat/completions", &api_request).await?;

        let (tx, stream) = CompletionStream::channel();
        tokio::spawn(async move {
            let mut framer = SseFramer::new();
            let mut body = response.bytes_stream();
            let mut finish_reason = FinishReason::Stop;
            let mut usage = TokenUsage::default();
            let mut served_model = model;
            let mut done = false;

            'outer: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for event in framer.push(&chunk) {
                    if event.data == "[DONE]" {
                        done = true;
                        break 'outer;
                    }
                    let parsed: wire::ChatChunk = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            let _ = tx
                                .send(Err(ProviderError::Stream(format!(
                                    "bad stream chunk: {e}"
                                ))))
                                .await;
                            return;
                        }
                    };
                    if let Some(m) = parsed.model.filter(|m| !m.is_empty()) {
                        served_model = m;
                    }
                    if let Some(u) = parsed.usage {
                        usage = TokenUsage {
                            prompt_tokens: u.prompt_tokens,
                            completion_tokens: u.completion_tokens,
                            total_tokens: u.total_tokens,
                        };
                    }
                    for choice in parsed.choices {
                        if let Some(reason) = choice.finish_reason.as_deref() {
                            finish_reason = finish_reason_from_wire(Some(reason));
                        }
                        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                            if tx.send(Ok(StreamChunk::TextDelta { text })).await.is_err() {
                                return;
                            }
                        }
                        for call in choice.delta.tool_calls.unwrap_or_default() {
                            let (name, arguments_delta) = match call.function {
                                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                                None => (None, String::new()),
                            };
                            let delta = StreamChunk::ToolCallDelta {
                                index: call.index,
                                id: call.id,
                                name,
                                arguments_delta,
                            };
                            if tx.send(Ok(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            if !done {
                // Transport closed without [DONE]; surface what we have.
                tracing::debug!("relay.provider.stream_closed_early");
            }
            let _ = tx
                .send(Ok(StreamChunk::Done { finish_reason, usage, model: served_model }))
                .await;
        });

        Ok(stream)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let Some(model) = &self.embedding_model else {
            return Err(ProviderError::Unsupported(format!(
                "{} has no embedding deployment configured",
                self.name
            )));
        };
        let body = serde_json::json!({"model": model, "input": texts});
        let response = self.post_json("/embeddings", &body).await?;
        let list: wire::EmbeddingList = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(list.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
