use std::time::Duration;

use async_trait::async_trait;
use mentionbot_core::config::{LlmConfig, LlmProvider};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use crate::llm::{endpoint, ChatRequest, ChatResponse, LlmClient, LlmError};

/// Client for `/chat/completions` endpoints (OpenAI and Ollama).
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    client: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        api_base: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            completions_url: endpoint(api_base, "/chat/completions"),
            api_key: api_key.map(str::trim).filter(|key| !key.is_empty()).map(str::to_string),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.as_ref().map(|key| key.expose_secret().to_string());
        if config.provider == LlmProvider::OpenAi
            && api_key.as_deref().map(str::trim).unwrap_or_default().is_empty()
        {
            return Err(LlmError::MissingApiKey);
        }

        Self::new(
            config.effective_base_url(),
            api_key.as_deref(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self.client.post(&self.completions_url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::HttpStatus { status: status.as_u16(), body: raw });
        }

        parse_completions_response(&raw)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_completions_response(raw: &str) -> Result<ChatResponse, LlmError> {
    let parsed: CompletionsResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    Ok(ChatResponse::from_outputs(
        parsed.choices.into_iter().map(|choice| choice.message.content.unwrap_or_default()),
    ))
}
