//! Chat runtime - turns a Slack mention into a chat completion
//!
//! - **Model** (`llm`) - role-tagged messages, `ChatResponse` generations,
//!   the `LlmClient` seam and provider selection
//! - **Providers** (`anthropic`, `openai`) - HTTP clients for the Anthropic
//!   Messages API and `/chat/completions` compatible endpoints (OpenAI, Ollama)
//! - **Invocation** (`chat`) - `ChatService::generate`, one request per mention
//!   combining the user's text with the system prompt

pub mod anthropic;
pub mod chat;
pub mod llm;
pub mod openai;

pub use chat::{ChatError, ChatService};
pub use llm::{
    build_llm_client, extract_response, to_message, ChatMessage, ChatRequest, ChatResponse,
    Generation, LlmClient, LlmError, MessageRole,
};
