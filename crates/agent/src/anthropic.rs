use std::time::Duration;

use async_trait::async_trait;
use mentionbot_core::config::LlmConfig;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    endpoint, ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, MessageRole,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicClient {
    client: reqwest::Client,
    messages_url: String,
}

impl AnthropicClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|e| LlmError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let client = reqwest::Client::builder().default_headers(headers).timeout(timeout).build()?;

        Ok(Self { client, messages_url: endpoint(api_base, "/messages") })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.as_ref().ok_or(LlmError::MissingApiKey)?;
        Self::new(
            config.effective_base_url(),
            api_key.expose_secret(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = build_messages_request_body(&request);
        let response = self.client.post(&self.messages_url).json(&body).send().await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::HttpStatus { status: status.as_u16(), body: raw });
        }

        parse_messages_response(&raw)
    }
}

fn build_messages_request_body(request: &ChatRequest) -> Value {
    let system = request
        .messages
        .iter()
        .filter(|message| message.role == MessageRole::System)
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let messages = request
        .messages
        .iter()
        .filter(|message| message.role != MessageRole::System)
        .map(to_anthropic_message)
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    body
}

fn to_anthropic_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        MessageRole::Assistant => "assistant",
        MessageRole::User | MessageRole::System => "user",
    };
    json!({ "role": role, "content": message.content })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn parse_messages_response(raw: &str) -> Result<ChatResponse, LlmError> {
    let parsed: MessagesResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    let outputs = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>();

    Ok(ChatResponse::from_outputs(outputs))
}
