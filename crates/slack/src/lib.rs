//! Slack Integration - Events API mention bot
//!
//! This crate provides the Slack side of mentionbot:
//! - **Events** (`events`) - typed `app_mention` / `message` / `message_changed`
//!   events, envelope parsing and the `EventDispatcher`
//! - **Signatures** (`signature`) - `X-Slack-Signature` verification
//! - **Requests** (`request`) - `process_slack_request`, raw body to dispatch
//! - **Mentions** (`mention`) - acknowledge, placeholder, generate, reply
//! - **Responder** (`responder`) - Web API delivery (`chat.postMessage`,
//!   `chat.update`)
//!
//! # Getting Started
//!
//! 1. Create a Slack app at https://api.slack.com/apps
//! 2. Subscribe to the `app_mention` bot event with the request URL
//!    `https://<host>/slack/events`
//! 3. Grant the `app_mentions:read` and `chat:write` scopes
//! 4. Set env vars: `MENTIONBOT_SLACK_BOT_TOKEN`, `MENTIONBOT_SLACK_SIGNING_SECRET`
//!
//! # Architecture
//!
//! ```text
//! POST /slack/events → process_slack_request → EventDispatcher → MentionHandler
//!                                                                      ↓ (spawned)
//!            SlackResponder ← placeholder, ChatService::generate, answer
//! ```

pub mod events;
pub mod mention;
pub mod request;
pub mod responder;
pub mod signature;

pub use events::{EventContext, EventDispatcher, SlackEvent};
pub use mention::{InFlight, MentionHandler};
pub use request::{process_slack_request, ProcessError, SlackAck};
pub use responder::{SlackResponder, SlackWebResponder};
pub use signature::SignatureVerifier;
