//! Google Vertex adapter (Gemini wire shape).
//!
//! Gemini speaks `contents` of role/parts, keeps the system prompt in a
//! distinct `systemInstruction`, and tucks sampling knobs into
//! `generationConfig`. Function calls carry no ids on the wire, so the
//! adapter generates `call_N` ids on the way out and resolves
//! `functionResponse` names by looking the id up in conversation history.

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
    //! Gemini wire structs (camelCase on the wire).

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerateRequest {
        pub contents: Vec<Content>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub generation_config: Option<GenerationConfig>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub tools: Vec<ToolDeclarations>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Content {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Part {
        #[serde(rename = "text")]
        Text(String),
        #[serde(rename = "functionCall")]
        FunctionCall(FunctionCall),
        #[serde(rename = "functionResponse")]
        FunctionResponse(FunctionResponse),
        #[serde(rename = "inlineData")]
        InlineData(InlineData),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FunctionCall {
        pub name: String,
        pub args: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FunctionResponse {
        pub name: String,
        pub response: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InlineData {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerationConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub max_output_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub response_mime_type: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ToolDeclarations {
        pub function_declarations: Vec<FunctionDeclaration>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct FunctionDeclaration {
        pub name: String,
        pub description: String,
        pub parameters: serde_json::Value,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenerateResponse {
        #[serde(default)]
        pub candidates: Vec<Candidate>,
        #[serde(default)]
        pub usage_metadata: Option<UsageMetadata>,
        #[serde(default)]
        pub model_version: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Candidate {
        #[serde(default)]
        pub content: Option<Content>,
        #[serde(default)]
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct UsageMetadata {
        #[serde(default)]
        pub prompt_token_count: u64,
        #[serde(default)]
        pub candidates_token_count: u64,
        #[serde(default)]
        pub total_token_count: u64,
    }
}

// ---- Codec ---------------------------------------------------------------

/// Find the function name behind a tool-call id by scanning history.
fn resolve_call_name<'a>(messages: &'a [Message], call_id: &str) -> Option<&'a str> {
    messages
        .iter()
        .rev()
        .flat_map(|m| m.tool_calls.iter())
        .find(|call| call.id == call_id)
        .map(|call| call.name.as_str())
}

pub(crate) fn messages_to_wire(
    messages: &[Message],
) -> (Option<wire::Content>, Vec<wire::Content>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(wire::Part::Text(message.content.as_text())),
            Role::User => {
                let parts = match &message.content {
                    MessageContent::Text(text) => vec![wire::Part::Text(text.clone())],
                    MessageContent::Parts(parts) => parts
                        .iter()
                        .map(|part| match part {
                            relay_types::ContentPart::Text { text } => {
                                wire::Part::Text(text.clone())
                            }
                            relay_types::ContentPart::Image { source, media_type } => {
                                let data = match source {
                                    relay_types::ImageSource::Base64 { data } => data.clone(),
                                    relay_types::ImageSource::Url { url } => url.clone(),
                                };
                                wire::Part::InlineData(wire::InlineData {
                                    mime_type: media_type.clone(),
                                    data,
                                })
                            }
                        })
                        .collect(),
                };
                contents.push(wire::Content { role: Some("user".into()), parts });
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                let text = message.content.as_text();
                if !text.is_empty() {
                    parts.push(wire::Part::Text(text));
                }
                for call in &message.tool_calls {
                    parts.push(wire::Part::FunctionCall(wire::FunctionCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    }));
                }
                contents.push(wire::Content { role: Some("model".into()), parts });
            }
            Role::Tool => {
                let call_id = message.tool_call_id.as_deref().unwrap_or_default();
                let name = resolve_call_name(messages, call_id)
                    .unwrap_or(call_id)
                    .to_string();
                let response = serde_json::from_str(&message.content.as_text())
                    .unwrap_or_else(|_| {
                        serde_json::json!({"result": message.content.as_text()})
                    });
                contents.push(wire::Content {
                    role: Some("user".into()),
                    parts: vec![wire::Part::FunctionResponse(wire::FunctionResponse {
                        name,
                        response,
                    })],
                });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(wire::Content { role: None, parts: system_parts })
    };
    (system, contents)
}

pub(crate) fn request_to_wire(request: &CompletionRequest) -> wire::GenerateRequest {
    let (system_instruction, contents) = messages_to_wire(&request.messages);
    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![wire::ToolDeclarations {
            function_declarations: request
                .tools
                .iter()
                .map(|tool| wire::FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
                .collect(),
        }]
    };
    wire::GenerateRequest {
        contents,
        system_instruction,
        generation_config: Some(wire::GenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            response_mime_type: request.response_format.as_ref().and_then(|f| match f {
                relay_types::ResponseFormat::JsonObject => Some("application/json".to_string()),
                relay_types::ResponseFormat::Text => None,
            }),
        }),
        tools,
    }
}

pub(crate) fn finish_reason_from_wire(reason: Option<&str>, has_calls: bool) -> FinishReason {
    if has_calls {
        return FinishReason::ToolCalls;
    }
    match reason {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Stop,
    }
}

fn usage_from_wire(usage: Option<wire::UsageMetadata>) -> TokenUsage {
    usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default()
}

fn response_from_wire(
    model: &str,
    response: wire::GenerateResponse,
) -> Result<CompletionResponse, ProviderError> {
    let usage = usage_from_wire(response.usage_metadata);
    let served_model = response.model_version.unwrap_or_else(|| model.to_string());
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("response had no candidates".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    if let Some(content) = candidate.content {
        for part in content.parts {
            match part {
                wire::Part::Text(t) => text.push_str(&t),
                wire::Part::FunctionCall(call) => {
                    tool_calls.push(ToolCall {
                        id: format!("call_{}", tool_calls.len()),
                        name: call.name,
                        arguments: call.args,
                    });
                }
                _ => {}
            }
        }
    }

    let finish_reason =
        finish_reason_from_wire(candidate.finish_reason.as_deref(), !tool_calls.is_empty());
    Ok(CompletionResponse {
        id: String::new(),
        model: served_model,
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

// ---- Adapter -------------------------------------------------------------

/// Google Vertex provider for Gemini models.
pub struct VertexProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    embedding_model: Option<String>,
}

impl VertexProvider {
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

    /// Set the model used for [`Provider::embed`].
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    async fn post(
        &self,
        path: String,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .header("x-goog-api-key", &self.api_key)
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
impl Provider for VertexProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::GoogleVertex
    }

    async fn list_models(&self) -> Result<Vec<ModelListing>, ProviderError> {
        #[derive(serde::Deserialize)]
        struct List {
            #[serde(default)]
            models: Vec<Entry>,
        }
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Entry {
            name: String,
            #[serde(default)]
            display_name: Option<String>,
        }
        let response = self
            .client
            .get(format!("{}/v1beta/models", self.endpoint))
            .header("x-goog-api-key", &self.api_key)
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
            .models
            .into_iter()
            .map(|entry| {
                let id = entry
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&entry.name)
                    .to_string();
                ModelListing {
                    name: entry.display_name.unwrap_or_else(|| id.clone()),
                    id,
                    provider: self.name.clone(),
                }
            })
            .collect())
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_request = request_to_wire(&request);
        let response = self
            .post(
                format!("/v1beta/models/{}:generateContent", request.model),
                &api_request,
            )
            .await?;
        let parsed: wire::GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        response_from_wire(&request.model, parsed)
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let api_request = request_to_wire(&request);
        let model = request.model.clone();
        let response = self
            .post(
                format!(
                    "/v1beta/models/{}:streamGenerateContent?alt=sse",
                    request.model
                ),
                &api_request,
            )
            .await?;

        let (tx, stream) = CompletionStream::channel();
        tokio::spawn(async move {
            let mut framer = SseFramer::new();
            let mut body = response.bytes_stream();
            let mut finish_reason = FinishReason::Stop;
            let mut usage = TokenUsage::default();
            let mut served_model = model;
            let mut call_count = 0usize;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Stream(e.to_string()))).await;
                        return;
                    }
                };
                for event in framer.push(&chunk) {
                    let parsed: wire::GenerateResponse = match serde_json::from_str(&event.data) {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = tx
                                .send(Err(ProviderError::Stream(format!("bad chunk: {e}"))))
                                .await;
                            return;
                        }
                    };
                    if let Some(m) = parsed.model_version {
                        served_model = m;
                    }
                    if let Some(u) = parsed.usage_metadata {
                        usage = TokenUsage {
                            prompt_tokens: u.prompt_token_count,
                            completion_tokens: u.candidates_token_count,
                            total_tokens: u.total_token_count,
                        };
                    }
                    for candidate in parsed.candidates {
                        if let Some(content) = candidate.content {
                            for part in content.parts {
                                match part {
                                    wire::Part::Text(text) => {
                                        if !text.is_empty()
                                            && tx
                                                .send(Ok(StreamChunk::TextDelta { text }))
                                                .await
                                                .is_err()
                                        {
                                            return;
                                        }
                                    }
                                    wire::Part::FunctionCall(call) => {
                                        // Gemini delivers a call whole; one delta
                                        // carries id, name, and full arguments.
                                        let index = call_count;
                                        call_count += 1;
                                        finish_reason = FinishReason::ToolCalls;
                                        let delta = StreamChunk::ToolCallDelta {
                                            index,
                                            id: Some(format!("call_{index}")),
                                            name: Some(call.name),
                                            arguments_delta: call.args.to_string(),
                                        };
                                        if tx.send(Ok(delta)).await.is_err() {
                                            return;
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        if let Some(reason) = candidate.finish_reason.as_deref() {
                            finish_reason =
                                finish_reason_from_wire(Some(reason), call_count > 0);
                        }
                    }
                }
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
                "{} has no embedding model configured",
                self.name
            )));
        };
        #[derive(serde::Deserialize)]
        struct BatchResponse {
            embeddings: Vec<Embedding>,
        }
        #[derive(serde::Deserialize)]
        struct Embedding {
            values: Vec<f32>,
        }
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{model}"),
                    "content": {"parts": [{"text": text}]}
                })
            })
            .collect();
        let response = self
            .post(
                format!("/v1beta/models/{model}:batchEmbedContents"),
                &serde_json::json!({"requests": requests}),
            )
            .await?;
        let parsed: BatchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_conversation() -> Vec<Message> {
        vec![
            Message::system("Be terse."),
            Message::user("list my azure subscriptions"),
            Message {
                role: Role::Assistant,
                content: MessageContent::Text(String::new()),
                tool_calls: vec![ToolCall {
                    id: "call_0".into(),
                    name: "subscription_list".into(),
                    arguments: json!({"scope": "all"}),
                }],
                tool_call_id: None,
            },
            Message::tool_result("call_0", "{\"subs\": [\"a\"]}"),
        ]
    }

    #[test]
    fn system_goes_to_system_instruction() {
        let (system, contents) = messages_to_wire(&tool_conversation());
        assert!(system.is_some());
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn function_response_resolves_name_from_history() {
        let (_, contents) = messages_to_wire(&tool_conversation());
        match &contents[2].parts[0] {
            wire::Part::FunctionResponse(fr) => {
                assert_eq!(fr.name, "subscription_list");
                assert_eq!(fr.response, json!({"subs": ["a"]}));
            }
            other => panic!("expected FunctionResponse, got {other:?}"),
        }
    }

    #[test]
    fn non_json_tool_result_is_wrapped() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: MessageContent::Text(String::new()),
                tool_calls: vec![ToolCall {
                    id: "call_0".into(),
                    name: "t".into(),
                    arguments: json!({}),
                }],
                tool_call_id: None,
            },
            Message::tool_result("call_0", "plain text"),
        ];
        let (_, contents) = messages_to_wire(&messages);
        match &contents[1].parts[0] {
            wire::Part::FunctionResponse(fr) => {
                assert_eq!(fr.response, json!({"result": "plain text"}));
            }
            other => panic!("expected FunctionResponse, got {other:?}"),
        }
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(finish_reason_from_wire(Some("STOP"), false), FinishReason::Stop);
        assert_eq!(finish_reason_from_wire(Some("STOP"), true), FinishReason::ToolCalls);
        assert_eq!(finish_reason_from_wire(Some("MAX_TOKENS"), false), FinishReason::Length);
        assert_eq!(
            finish_reason_from_wire(Some("SAFETY"), false),
            FinishReason::ContentFilter
        );
    }

    #[tokio::test]
    async fn complete_parses_generate_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {
                    "promptTokenCount": 6,
                    "candidatesTokenCount": 2,
                    "totalTokenCount": 8
                }
            })))
            .mount(&server)
            .await;

        let provider = VertexProvider::new(&ProviderConfig {
            name: "vertex-test".into(),
            provider_type: ProviderType::GoogleVertex,
            enabled: true,
            priority: 0,
            endpoint: server.uri(),
            api_key: "k".into(),
            region: None,
        });

        let response = provider
            .complete(CompletionRequest {
                model: "gemini-2.0-flash".into(),
                messages: vec![Message::user("hi")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.message.content.as_text(), "Hello!");
        assert_eq!(response.usage.total_tokens, 8);
    }

    #[tokio::test]
    async fn stream_emits_text_then_done() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2,\"totalTokenCount\":6}}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = VertexProvider::new(&ProviderConfig {
            name: "vertex-test".into(),
            provider_type: ProviderType::GoogleVertex,
            enabled: true,
            priority: 0,
            endpoint: server.uri(),
            api_key: "k".into(),
            region: None,
        });

        let stream = provider
            .complete_stream(CompletionRequest {
                model: "gemini-2.0-flash".into(),
                messages: vec![Message::user("hi")],
                stream: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let response = stream.collect().await.unwrap();
        assert_eq!(response.message.content.as_text(), "Hello");
        assert_eq!(response.usage.total_tokens, 6);
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }
}
