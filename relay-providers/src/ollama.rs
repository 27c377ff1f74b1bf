//! Ollama adapter (native `/api/chat` wire shape).
//!
//! Local models for development and air-gapped deployments. Content is a
//! plain string with images carried in a separate base64 array, tool-call
//! arguments arrive as JSON objects rather than strings, and the stream is
//! newline-delimited JSON instead of SSE.

use async_trait::async_trait;
use futures::StreamExt;

use relay_types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, MessageContent, ProviderConfig,
    ProviderError, ProviderType, Role, TokenUsage, ToolCall,
};

use crate::common::{classify_http_error, classify_transport_error};
use crate::provider::{CompletionStream, ModelListing, Provider, StreamChunk};

pub(crate) mod wire {
    //! Ollama wire structs.

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatRequest {
        pub model: String,
        pub messages: Vec<ChatMessage>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub tools: Vec<Tool>,
        pub stream: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub options: Option<Options>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String,
        pub content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub images: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub tool_calls: Vec<WireToolCall>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WireToolCall {
        pub function: WireFunctionCall,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WireFunctionCall {
        pub name: String,
        pub arguments: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Tool {
        #[serde(rename = "type")]
        pub kind: String,
        pub function: FunctionDef,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FunctionDef {
        pub name: String,
        pub description: String,
        pub parameters: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Options {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub num_predict: Option<u32>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ChatResponse {
        pub model: String,
        #[serde(default)]
        pub message: Option<ChatMessage>,
        pub done: bool,
        #[serde(default)]
        pub done_reason: Option<String>,
        #[serde(default)]
        pub prompt_eval_count: Option<u64>,
        #[serde(default)]
        pub eval_count: Option<u64>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct TagList {
        pub models: Vec<TagEntry>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct TagEntry {
        pub name: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct EmbedResponse {
        pub embeddings: Vec<Vec<f32>>,
    }
}

// ---- Codec ---------------------------------------------------------------

pub(crate) fn message_to_wire(message: &Message) -> wire::ChatMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut images = Vec::new();
    if let MessageContent::Parts(parts) = &message.content {
        for part in parts {
            if let relay_types::ContentPart::Image { source, .. } = part {
                match source {
                    relay_types::ImageSource::Base64 { data } => images.push(data.clone()),
                    relay_types::ImageSource::Url { url } => images.push(url.clone()),
                }
            }
        }
    }
    wire::ChatMessage {
        role: role.to_string(),
        content: message.content.as_text(),
        images,
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| wire::WireToolCall {
                function: wire::WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect(),
    }
}

pub(crate) fn request_to_wire(request: &CompletionRequest) -> wire::ChatRequest {
    wire::ChatRequest {
        model: request.model.clone(),
        messages: request.messages.iter().map(message_to_wire).collect(),
        tools: request
            .tools
            .iter()
            .map(|tool| wire::Tool {
                kind: "function".into(),
                function: wire::FunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect(),
        stream: request.stream,
        options: Some(wire::Options {
            temperature: request.temperature,
            num_predict: request.max_tokens,
        }),
    }
}

fn calls_from_wire(calls: Vec<wire::WireToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| ToolCall {
            id: format!("call_{i}"),
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect()
}

fn usage_from_wire(prompt: Option<u64>, completion: Option<u64>) -> TokenUsage {
    TokenUsage::new(prompt.unwrap_or(0), completion.unwrap_or(0))
}

// ---- Adapter -------------------------------------------------------------

/// Ollama provider.
pub struct OllamaProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    embedding_model: Option<String>,
}

impl OllamaProvider {
    /// Build an adapter from a provider config.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            embedding_model: None,
        }
    }

    /// Set the model used for [`Provider::embed`].
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    async fn post(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
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
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    async fn list_models(&self) -> Result<Vec<ModelListing>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, body));
        }
        let list: wire::TagList = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(list
            .models
            .into_iter()
            .map(|entry| ModelListing {
                id: entry.name.clone(),
                name: entry.name,
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
        let response = self.post("/api/chat", &api_request).await?;
        let parsed: wire::ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let message = parsed
            .message
            .ok_or_else(|| ProviderError::InvalidResponse("response had no message".into()))?;
        let tool_calls = calls_from_wire(message.tool_calls);
        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else if parsed.done_reason.as_deref() == Some("length") {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };
        Ok(CompletionResponse {
            id: String::new(),
            model: parsed.model,
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(message.content),
                tool_calls,
                tool_call_id: None,
            },
            usage: usage_from_wire(parsed.prompt_eval_count, parsed.eval_count),
            finish_reason,
        })
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let mut api_request = request_to_wire(&request);
        api_request.stream = true;
        let fallback_model = request.model.clone();
        let response = self.post("/api/chat", &api_request).await?;

        let (tx, stream) = CompletionStream::channel();
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut line_buf = String::new();
            let mut finish_reason = FinishReason::Stop;
            let mut usage = TokenUsage::default();
            let mut model = fallback_model;
            let mut call_count = 0usize;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                line_buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = line_buf.find('\n') {
                    let line: String = line_buf.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: wire::ChatResponse = match serde_json::from_str(line) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = tx
                                .send(Err(ProviderError::Stream(format!("bad line: {e}"))))
                                .await;
                            return;
                        }
                    };
                    model = parsed.model;
                    if let Some(message) = parsed.message {
                        if !message.content.is_empty()
                            && tx
                                .send(Ok(StreamChunk::TextDelta { text: message.content }))
                                .await
                                .is_err()
                        {
                            return;
                        }
                        for call in message.tool_calls {
                            let index = call_count;
                            call_count += 1;
                            finish_reason = FinishReason::ToolCalls;
                            let delta = StreamChunk::ToolCallDelta {
                                index,
                                id: Some(format!("call_{index}")),
                                name: Some(call.function.name),
                                arguments_delta: call.function.arguments.to_string(),
                            };
                            if tx.send(Ok(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if parsed.done {
                        if parsed.done_reason.as_deref() == Some("length") {
                            finish_reason = FinishReason::Length;
                        }
                        usage = usage_from_wire(parsed.prompt_eval_count, parsed.eval_count);
                    }
                }
            }

            let _ = tx
                .send(Ok(StreamChunk::Done { finish_reason, usage, model }))
                .await;
        });

        Ok(stream)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let Some(model) = &self.embedding_model else {
            return Err(ProviderError::Unsupported(format!(
                "{} has no embedding model configured",
                self.name
            )));
        };
        let body = serde_json::json!({"model": model, "input": texts});
        let response = self.post("/api/embed", &body).await?;
        let parsed: wire::EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn images_split_out_of_content() {
        let message = Message {
            role: Role::User,
            content: MessageContent::Parts(vec![
                relay_types::ContentPart::Text { text: "what is this".into() },
                relay_types::ContentPart::Image {
                    source: relay_types::ImageSource::Base64 { data: "aGVsbG8=".into() },
                    media_type: "image/png".into(),
                },
            ]),
            tool_calls: vec![],
            tool_call_id: None,
        };
        let wire_message = message_to_wire(&message);
        assert_eq!(wire_message.content, "what is this");
        assert_eq!(wire_message.images, vec!["aGVsbG8=".to_string()]);
    }

    #[test]
    fn arguments_stay_objects_on_the_wire() {
        let message = Message {
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
            tool_calls: vec![ToolCall {
                id: "call_0".into(),
                name: "t".into(),
                arguments: json!({"a": 1}),
            }],
            tool_call_id: None,
        };
        let v = serde_json::to_value(message_to_wire(&message)).unwrap();
        assert_eq!(v["tool_calls"][0]["function"]["arguments"]["a"], 1);
    }

    #[tokio::test]
    async fn complete_parses_native_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.1",
                "message": {"role": "assistant", "content": "Hi!"},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 11,
                "eval_count": 2
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ProviderConfig {
            name: "ollama-local".into(),
            provider_type: ProviderType::Ollama,
            enabled: true,
            priority: 0,
            endpoint: server.uri(),
            api_key: String::new(),
            region: None,
        });

        let response = provider
            .complete(CompletionRequest {
                model: "llama3.1".into(),
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.message.content.as_text(), "Hi!");
        assert_eq!(response.usage.total_tokens, 13);
    }

    #[tokio::test]
    async fn stream_parses_jsonl() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let body = concat!(
            "{\"model\":\"llama3.1\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"model\":\"llama3.1\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"model\":\"llama3.1\",\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":7,\"eval_count\":2}\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ProviderConfig {
            name: "ollama-local".into(),
            provider_type: ProviderType::Ollama,
            enabled: true,
            priority: 0,
            endpoint: server.uri(),
            api_key: String::new(),
            region: None,
        });

        let stream = provider
            .complete_stream(CompletionRequest {
                model: "llama3.1".into(),
                messages: vec![Message::user("hi")],
                stream: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content.as_text(), "Hello");
        assert_eq!(response.usage.prompt_tokens, 7);
        assert_eq!(response.model, "llama3.1");
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.1:8b"}, {"name": "nomic-embed-text"}]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ProviderConfig {
            name: "ollama-local".into(),
            provider_type: ProviderType::Ollama,
            enabled: true,
            priority: 0,
            endpoint: server.uri(),
            api_key: String::new(),
            region: None,
        });

        let models = provider.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "llama3.1:8b");
    }
}
