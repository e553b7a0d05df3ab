use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub event_id: String,
    pub team_id: Option<String>,
    pub event: SlackEvent,
}

/// The closed set of Events API payloads the bot understands. Everything
/// else is rejected at parse time with [`EventError::Unsupported`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(AppMentionEvent),
    Message(MessageEvent),
    MessageChanged(MessageChangedEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    Message,
    MessageChanged,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppMentionEvent {
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MessageChangedEvent {
    pub channel: String,
    /// Timestamp of the `message_changed` wrapper, not of the edited message.
    pub ts: String,
    pub message: ChangedMessage,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChangedMessage {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event type is not supported: {event_type}")]
    Unsupported { event_type: String },
    #[error("event payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("malformed `{event_type}` event: {reason}")]
    Malformed { event_type: String, reason: String },
}

const MESSAGE_SUBTYPES: &[&str] = &["thread_broadcast", "bot_message", "file_share", "me_message"];

impl SlackEvent {
    pub fn from_payload(payload: &Value) -> Result<Self, EventError> {
        let event_type =
            payload.get("type").and_then(Value::as_str).ok_or(EventError::MissingField("type"))?;

        match event_type {
            "app_mention" => decode(event_type, payload).map(Self::AppMention),
            "message" => match payload.get("subtype").and_then(Value::as_str) {
                None => decode(event_type, payload).map(Self::Message),
                Some(subtype) if MESSAGE_SUBTYPES.contains(&subtype) => {
                    decode(event_type, payload).map(Self::Message)
                }
                Some("message_changed") => {
                    decode("message_changed", payload).map(Self::MessageChanged)
                }
                Some(other) => {
                    Err(EventError::Unsupported { event_type: format!("message.{other}") })
                }
            },
            other => Err(EventError::Unsupported { event_type: other.to_string() }),
        }
    }

    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::Message(_) => SlackEventType::Message,
            Self::MessageChanged(_) => SlackEventType::MessageChanged,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Self::AppMention(mention) => &mention.channel,
            Self::Message(message) => &message.channel,
            Self::MessageChanged(change) => &change.channel,
        }
    }

    /// Root of the conversation thread: the explicit `thread_ts` when the
    /// event is a reply, otherwise the event's own `ts`. Edits resolve
    /// against the edited message, never the wrapper.
    pub fn thread_ts(&self) -> &str {
        match self {
            Self::AppMention(mention) => mention.thread_ts.as_deref().unwrap_or(&mention.ts),
            Self::Message(message) => message.thread_ts.as_deref().unwrap_or(&message.ts),
            Self::MessageChanged(change) => {
                change.message.thread_ts.as_deref().unwrap_or(&change.message.ts)
            }
        }
    }

    /// Timestamp of the event itself. Unique per delivery within a channel.
    pub fn ts(&self) -> &str {
        match self {
            Self::AppMention(mention) => &mention.ts,
            Self::Message(message) => &message.ts,
            Self::MessageChanged(change) => &change.ts,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::AppMention(mention) => &mention.text,
            Self::Message(message) => &message.text,
            Self::MessageChanged(change) => &change.message.text,
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Self::AppMention(mention) => Some(mention.user.as_str()).filter(|u| !u.is_empty()),
            Self::Message(message) => message.user.as_deref(),
            Self::MessageChanged(change) => change.message.user.as_deref(),
        }
    }

    pub fn bot_id(&self) -> Option<&str> {
        match self {
            Self::AppMention(mention) => mention.bot_id.as_deref(),
            Self::Message(message) => message.bot_id.as_deref(),
            Self::MessageChanged(change) => change.message.bot_id.as_deref(),
        }
    }

    pub fn history_key(&self) -> String {
        history_key(self.channel(), self.thread_ts())
    }
}

pub fn history_key(channel: &str, thread_ts: &str) -> String {
    format!("{channel}-{thread_ts}")
}

fn decode<T>(event_type: &str, payload: &Value) -> Result<T, EventError>
where
    T: for<'de> Deserialize<'de>,
{
    T::deserialize(payload).map_err(|error| EventError::Malformed {
        event_type: event_type.to_string(),
        reason: error.to_string(),
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventsApiPayload {
    UrlVerification { challenge: String },
    EventCallback(SlackEnvelope),
    Other { kind: String },
}

/// Parses the top-level Events API body (`url_verification`,
/// `event_callback`, anything else).
pub fn parse_events_api_payload(body: &[u8]) -> Result<EventsApiPayload, EventError> {
    let payload: Value = serde_json::from_slice(body).map_err(|error| EventError::Malformed {
        event_type: "events_api".to_string(),
        reason: error.to_string(),
    })?;

    let kind =
        payload.get("type").and_then(Value::as_str).ok_or(EventError::MissingField("type"))?;
    match kind {
        "url_verification" => {
            let challenge = payload
                .get("challenge")
                .and_then(Value::as_str)
                .ok_or(EventError::MissingField("challenge"))?;
            Ok(EventsApiPayload::UrlVerification { challenge: challenge.to_string() })
        }
        "event_callback" => {
            let event = payload.get("event").ok_or(EventError::MissingField("event"))?;
            let event_id = payload
                .get("event_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown-event-id")
                .to_string();
            let team_id = payload.get("team_id").and_then(Value::as_str).map(str::to_string);
            Ok(EventsApiPayload::EventCallback(SlackEnvelope {
                event_id,
                team_id,
                event: SlackEvent::from_payload(event)?,
            }))
        }
        other => Ok(EventsApiPayload::Other { kind: other.to_string() }),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// Accepted; the reply continues in the background.
    Acknowledged,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("mention handler failure: {0}")]
    Mention(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
