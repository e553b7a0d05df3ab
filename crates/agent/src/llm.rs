use std::sync::Arc;

use async_trait::async_trait;
use mentionbot_core::config::{LlmConfig, LlmProvider};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{anthropic::AnthropicClient, openai::OpenAiClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Rebuilds a thread message for chat history: anything the bot itself wrote
/// is an assistant turn, everything else is a user turn.
pub fn to_message(user_id: &str, bot_id: &str, text: impl Into<String>) -> ChatMessage {
    if user_id == bot_id {
        ChatMessage::assistant(text)
    } else {
        ChatMessage::user(text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub output: String,
}

impl Generation {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatResponse {
    pub generations: Vec<Generation>,
}

impl ChatResponse {
    pub fn from_outputs<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { generations: outputs.into_iter().map(Generation::new).collect() }
    }
}

/// Joins every generation's output with a newline, in generation order.
pub fn extract_response(response: &ChatResponse) -> String {
    response
        .generations
        .iter()
        .map(|generation| generation.output.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm api key is missing")]
    MissingApiKey,
    #[error("llm http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm api returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("llm response could not be parsed: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::Anthropic => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            Ok(Arc::new(OpenAiClient::from_config(config)?))
        }
    }
}

pub(crate) fn endpoint(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(suffix) {
        return base.to_string();
    }
    format!("{base}{suffix}")
}
