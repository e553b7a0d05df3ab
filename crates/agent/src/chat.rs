use std::sync::Arc;

use mentionbot_core::config::LlmConfig;
use thiserror::Error;
use tracing::debug;

use crate::llm::{extract_response, ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat generation failed")]
    Client(#[from] LlmError),
    #[error("chat generation task did not complete")]
    TaskFailed(#[source] tokio::task::JoinError),
    #[error("chat completion contained no text")]
    EmptyResponse,
}

/// Issues one chat completion per mention, pairing the user's message with
/// the configured system prompt.
#[derive(Clone)]
pub struct ChatService {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
    system_prompt: String,
}

impl ChatService {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        max_tokens: u32,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self { client, model: model.into(), max_tokens, system_prompt: system_prompt.into() }
    }

    pub fn from_config(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self::new(client, config.model.clone(), config.max_tokens, config.system_prompt.clone())
    }

    pub fn request_for(&self, message: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(message), ChatMessage::system(&self.system_prompt)],
            max_tokens: self.max_tokens,
        }
    }

    /// Runs the completion on its own tokio task so the caller's task is
    /// never blocked by the chat API. Failures are not retried. A completion
    /// without any text is an error, since Slack cannot post it.
    pub async fn generate(&self, message: &str) -> Result<ChatResponse, ChatError> {
        let request = self.request_for(message);
        let client = Arc::clone(&self.client);
        debug!(
            event_name = "chat.generate.start",
            model = %request.model,
            prompt_chars = message.chars().count(),
            "dispatching chat completion"
        );

        let handle = tokio::spawn(async move { client.complete(request).await });
        let response = handle.await.map_err(ChatError::TaskFailed)??;
        if extract_response(&response).trim().is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        debug!(
            event_name = "chat.generate.complete",
            generations = response.generations.len(),
            "chat completion finished"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use mentionbot_core::errors::exception_message;
    use tokio::sync::Mutex;

    use super::{ChatError, ChatService};
    use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, MessageRole};

    #[derive(Default)]
    struct RecordingClient {
        requests: Mutex<Vec<ChatRequest>>,
        fail_with_status: Option<u16>,
        blank: bool,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().await.push(request);
            match self.fail_with_status {
                Some(status) => {
                    Err(LlmError::HttpStatus { status, body: "rate limited".to_string() })
                }
                None if self.blank => Ok(ChatResponse::from_outputs(["", " \n"])),
                None => Ok(ChatResponse::from_outputs(["4"])),
            }
        }
    }

    struct PanickingClient;

    #[async_trait]
    impl LlmClient for PanickingClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, LlmError> {
            panic!("client exploded");
        }
    }

    #[tokio::test]
    async fn generate_sends_user_message_then_system_prompt() {
        let client = Arc::new(RecordingClient::default());
        let service = ChatService::new(client.clone(), "claude-test", 64, "be brief");

        let response = service.generate("what is 2+2?").await.expect("generate");

        assert_eq!(response, ChatResponse::from_outputs(["4"]));
        let requests = client.requests.lock().await;
        assert_eq!(requests.len(), 1);
        let roles: Vec<_> = requests[0].messages.iter().map(|message| message.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::System]);
        assert_eq!(requests[0].messages[0].content, "what is 2+2?");
        assert_eq!(requests[0].messages[1].content, "be brief");
        assert_eq!(requests[0].model, "claude-test");
    }

    #[tokio::test]
    async fn generate_propagates_client_failure_without_retry() {
        let client =
            Arc::new(RecordingClient { fail_with_status: Some(429), ..RecordingClient::default() });
        let service = ChatService::new(client.clone(), "claude-test", 64, "be brief");

        let error = service.generate("hi").await.expect_err("should fail");

        assert!(matches!(error, ChatError::Client(LlmError::HttpStatus { status: 429, .. })));
        assert!(exception_message(&error).contains("rate limited"));
        assert_eq!(client.requests.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn generate_rejects_completion_without_text() {
        let client = Arc::new(RecordingClient { blank: true, ..RecordingClient::default() });
        let service = ChatService::new(client.clone(), "claude-test", 64, "be brief");

        let error = service.generate("hi").await.expect_err("blank completion");

        assert!(matches!(error, ChatError::EmptyResponse));
        assert_eq!(exception_message(&error), "chat completion contained no text");
        assert_eq!(client.requests.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn generate_reports_panicked_task() {
        let service = ChatService::new(Arc::new(PanickingClient), "claude-test", 64, "be brief");

        let error = service.generate("hi").await.expect_err("should fail");

        assert!(matches!(error, ChatError::TaskFailed(_)));
    }
}
