use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use mentionbot_core::text::chunk_for_limit;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::events::{EventContext, SlackEvent};

/// Slack truncates long `text` fields; replies are split below this size.
pub const MAX_MESSAGE_CHARS: usize = 3_000;
const DEFAULT_TRACKED_THREADS: usize = 1_024;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("slack `{method}` returned HTTP {status}")]
    HttpStatus { method: &'static str, status: u16 },
    #[error("slack `{method}` failed: {error}")]
    Api { method: &'static str, error: String },
}

/// Delivers bot replies into the thread an event belongs to.
#[async_trait]
pub trait SlackResponder: Send + Sync {
    /// Posts `text` to the event's thread. Repeated calls for the same event
    /// and `history_key` replace the previous reply instead of adding a new
    /// one; another event in the same thread gets its own message.
    async fn send_response(
        &self,
        ctx: &EventContext,
        event: &SlackEvent,
        history_key: &str,
        text: &str,
    ) -> Result<(), SendError>;
}

/// Remembers the ts of the reply posted for each triggering event, oldest
/// evicted first.
#[derive(Debug)]
struct ReplyLedger {
    capacity: usize,
    by_key: HashMap<String, String>,
    order: VecDeque<String>,
}

impl ReplyLedger {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), by_key: HashMap::new(), order: VecDeque::new() }
    }

    fn get(&self, history_key: &str) -> Option<String> {
        self.by_key.get(history_key).cloned()
    }

    fn record(&mut self, history_key: &str, ts: String) {
        if self.by_key.insert(history_key.to_string(), ts).is_some() {
            return;
        }
        self.order.push_back(history_key.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.by_key.remove(&evicted);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// [`SlackResponder`] backed by the Slack Web API (`chat.postMessage`,
/// `chat.update`).
pub struct SlackWebResponder {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
    max_message_chars: usize,
    replies: Mutex<ReplyLedger>,
}

impl SlackWebResponder {
    pub fn new(api_base_url: impl Into<String>, bot_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            bot_token,
            max_message_chars: MAX_MESSAGE_CHARS,
            replies: Mutex::new(ReplyLedger::new(DEFAULT_TRACKED_THREADS)),
        }
    }

    pub fn with_max_message_chars(mut self, max_message_chars: usize) -> Self {
        self.max_message_chars = max_message_chars.max(1);
        self
    }

    pub fn with_tracked_threads(mut self, capacity: usize) -> Self {
        self.replies = Mutex::new(ReplyLedger::new(capacity));
        self
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<Option<String>, SendError> {
        let body = json!({ "channel": channel, "thread_ts": thread_ts, "text": text });
        self.call("chat.postMessage", &body).await
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<Option<String>, SendError> {
        let body = json!({ "channel": channel, "ts": ts, "text": text });
        self.call("chat.update", &body).await
    }

    async fn call(
        &self,
        method: &'static str,
        body: &serde_json::Value,
    ) -> Result<Option<String>, SendError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.api_base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::HttpStatus { method, status: status.as_u16() });
        }

        let payload: ApiResponse = response.json().await?;
        if !payload.ok {
            return Err(SendError::Api {
                method,
                error: payload.error.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        Ok(payload.ts)
    }
}

#[async_trait]
impl SlackResponder for SlackWebResponder {
    async fn send_response(
        &self,
        ctx: &EventContext,
        event: &SlackEvent,
        history_key: &str,
        text: &str,
    ) -> Result<(), SendError> {
        let channel = event.channel();
        let thread_ts = event.thread_ts();
        let chunks = chunk_for_limit(text, self.max_message_chars);
        let reply_key = reply_key(history_key, event.ts());
        let previous = self.replies.lock().await.get(&reply_key);

        let mut remaining = chunks.iter();
        if let Some(first) = remaining.next() {
            let ts = match &previous {
                Some(previous_ts) => {
                    self.update_message(channel, previous_ts, first).await?;
                    Some(previous_ts.clone())
                }
                None => self.post_message(channel, thread_ts, first).await?,
            };
            if let Some(ts) = ts {
                self.replies.lock().await.record(&reply_key, ts);
            }
        }

        let mut follow_ups = 0_usize;
        for chunk in remaining {
            self.post_message(channel, thread_ts, chunk).await?;
            follow_ups += 1;
        }

        if previous.is_some() {
            debug!(
                event_name = "egress.slack.reply_updated",
                correlation_id = %ctx.correlation_id,
                history_key,
                follow_ups,
                "updated previous slack reply"
            );
        } else {
            info!(
                event_name = "egress.slack.reply_posted",
                correlation_id = %ctx.correlation_id,
                history_key,
                follow_ups,
                "posted slack reply"
            );
        }

        Ok(())
    }
}

/// Placeholder and answer of one mention share a key; a later mention in
/// the same thread does not.
fn reply_key(history_key: &str, event_ts: &str) -> String {
    format!("{history_key}:{event_ts}")
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{ReplyLedger, SendError, SlackResponder, SlackWebResponder};
    use crate::events::{EventContext, SlackEvent};

    fn mention() -> SlackEvent {
        SlackEvent::from_payload(&json!({
            "type": "app_mention",
            "channel": "C1",
            "user": "U1",
            "text": "<@BOT> hi",
            "ts": "100"
        }))
        .expect("mention")
    }

    fn reply_in_thread(ts: &str) -> SlackEvent {
        SlackEvent::from_payload(&json!({
            "type": "app_mention",
            "channel": "C1",
            "user": "U2",
            "text": "<@BOT> and again",
            "ts": ts,
            "thread_ts": "100"
        }))
        .expect("threaded mention")
    }

    fn responder(server: &MockServer) -> SlackWebResponder {
        SlackWebResponder::new(server.base_url(), "xoxb-test".to_string().into())
    }

    #[tokio::test]
    async fn first_reply_posts_then_later_reply_updates_in_place() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("authorization", "Bearer xoxb-test")
                .json_body(json!({
                    "channel": "C1",
                    "thread_ts": "100",
                    "text": "Coming up with a response..."
                }));
            then.status(200).json_body(json!({ "ok": true, "channel": "C1", "ts": "101" }));
        });
        let update = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.update")
                .json_body(json!({ "channel": "C1", "ts": "101", "text": "4" }));
            then.status(200).json_body(json!({ "ok": true, "channel": "C1", "ts": "101" }));
        });

        let responder = responder(&server);
        let ctx = EventContext::default();
        let event = mention();
        responder
            .send_response(&ctx, &event, "C1-100", "Coming up with a response...")
            .await
            .expect("placeholder");
        responder.send_response(&ctx, &event, "C1-100", "4").await.expect("answer");

        post.assert_hits(1);
        update.assert_hits(1);
    }

    #[tokio::test]
    async fn second_mention_in_thread_keeps_the_first_answer() {
        let server = MockServer::start();
        let post_first = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .json_body(json!({ "channel": "C1", "thread_ts": "100", "text": "working a" }));
            then.status(200).json_body(json!({ "ok": true, "ts": "101" }));
        });
        let post_second = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .json_body(json!({ "channel": "C1", "thread_ts": "100", "text": "working b" }));
            then.status(200).json_body(json!({ "ok": true, "ts": "201" }));
        });
        let update_first = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.update")
                .json_body(json!({ "channel": "C1", "ts": "101", "text": "answer a" }));
            then.status(200).json_body(json!({ "ok": true, "ts": "101" }));
        });
        let update_second = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.update")
                .json_body(json!({ "channel": "C1", "ts": "201", "text": "answer b" }));
            then.status(200).json_body(json!({ "ok": true, "ts": "201" }));
        });

        let responder = responder(&server);
        let ctx = EventContext::default();
        let first = mention();
        let second = reply_in_thread("200");
        assert_eq!(first.history_key(), second.history_key());

        responder.send_response(&ctx, &first, "C1-100", "working a").await.expect("first");
        responder.send_response(&ctx, &first, "C1-100", "answer a").await.expect("first answer");
        responder.send_response(&ctx, &second, "C1-100", "working b").await.expect("second");
        responder.send_response(&ctx, &second, "C1-100", "answer b").await.expect("second answer");

        post_first.assert_hits(1);
        post_second.assert_hits(1);
        update_first.assert_hits(1);
        update_second.assert_hits(1);
    }

    #[tokio::test]
    async fn long_replies_are_split_into_follow_up_messages() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(200).json_body(json!({ "ok": true, "ts": "101" }));
        });

        let responder = responder(&server).with_max_message_chars(6);
        responder
            .send_response(&EventContext::default(), &mention(), "C1-100", "line1\nline2\nline3")
            .await
            .expect("send");

        post.assert_hits(3);
    }

    #[tokio::test]
    async fn api_errors_are_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(200).json_body(json!({ "ok": false, "error": "channel_not_found" }));
        });

        let error = responder(&server)
            .send_response(&EventContext::default(), &mention(), "C1-100", "hi")
            .await
            .expect_err("ok=false should fail");

        assert!(matches!(
            error,
            SendError::Api { method: "chat.postMessage", ref error } if error == "channel_not_found"
        ));
    }

    #[tokio::test]
    async fn http_failures_are_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(503);
        });

        let error = responder(&server)
            .send_response(&EventContext::default(), &mention(), "C1-100", "hi")
            .await
            .expect_err("503 should fail");

        assert!(matches!(error, SendError::HttpStatus { status: 503, .. }));
    }

    #[test]
    fn ledger_evicts_oldest_thread() {
        let mut ledger = ReplyLedger::new(2);
        ledger.record("a", "1".to_string());
        ledger.record("b", "2".to_string());
        ledger.record("a", "3".to_string());
        ledger.record("c", "4".to_string());

        assert_eq!(ledger.get("a"), None);
        assert_eq!(ledger.get("b").as_deref(), Some("2"));
        assert_eq!(ledger.get("c").as_deref(), Some("4"));
    }
}
